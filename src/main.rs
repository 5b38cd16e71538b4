fn main() {
    entitlement_engine::run();
}
