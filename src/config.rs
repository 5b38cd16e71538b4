use serde::Deserialize;

/// Process configuration, read from the environment (`DATABASE_URL`, `JWT_SECRET`, ...).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_port")]
    pub port: u16,

    pub jwt_secret: String,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_shortcode: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    #[serde(default = "default_mpesa_api_base")]
    pub mpesa_api_base: String,
    #[serde(default = "default_country_code")]
    pub mpesa_country_code: String,

    pub video_signing_secret: String,
    pub video_base_url: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }
}

fn default_database_url() -> String {
    "entitlements.db".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_mpesa_api_base() -> String {
    "https://sandbox.safaricom.co.ke".to_string()
}

fn default_country_code() -> String {
    "254".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    15
}

fn default_sweep_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("JWT_SECRET", "jwt"),
            ("STRIPE_SECRET_KEY", "sk_test"),
            ("STRIPE_WEBHOOK_SECRET", "whsec"),
            ("MPESA_CONSUMER_KEY", "ck"),
            ("MPESA_CONSUMER_SECRET", "cs"),
            ("MPESA_SHORTCODE", "174379"),
            ("MPESA_PASSKEY", "pk"),
            ("MPESA_CALLBACK_URL", "https://example.com/webhooks/mpesa"),
            ("VIDEO_SIGNING_SECRET", "video"),
            ("VIDEO_BASE_URL", "https://cdn.example.com"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn defaults_apply() {
        let config: Config = envy::from_iter(required()).unwrap();
        assert_eq!(config.database_url, "entitlements.db");
        assert_eq!(config.port, 3000);
        assert_eq!(config.mpesa_country_code, "254");
        assert_eq!(config.provider_timeout(), std::time::Duration::from_secs(15));
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn missing_secret_is_an_error() {
        let vars = required()
            .into_iter()
            .filter(|(k, _)| k != "STRIPE_WEBHOOK_SECRET");
        assert!(envy::from_iter::<_, Config>(vars).is_err());
    }
}
