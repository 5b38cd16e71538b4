//! Content delivery gatekeeper: signed streaming URLs and capped download tokens.

use crate::error::{AppError, AppResult};
use crate::model::{DownloadToken, Product, UserAccess};
use crate::store;
use chrono::NaiveDateTime;
use diesel::sqlite::SqliteConnection;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validity of a signed streaming URL.
pub const STREAM_URL_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone)]
pub enum AccessState {
    Live(UserAccess),
    Expired,
    Inactive,
    Absent,
}

pub fn access_state(
    conn: &mut SqliteConnection,
    user_id: &str,
    product_id: &str,
    now: NaiveDateTime,
) -> AppResult<AccessState> {
    Ok(match store::find_user_access(conn, user_id, product_id)? {
        None => AccessState::Absent,
        Some(access) if access.is_live(now) => AccessState::Live(access),
        Some(access) if !access.is_active => AccessState::Inactive,
        Some(_) => AccessState::Expired,
    })
}

/// Fails unless the user holds active, unexpired access to the product.
pub fn require_live_access(
    conn: &mut SqliteConnection,
    user_id: &str,
    product_id: &str,
    now: NaiveDateTime,
) -> AppResult<UserAccess> {
    match access_state(conn, user_id, product_id, now)? {
        AccessState::Live(access) => Ok(access),
        AccessState::Expired => Err(AppError::AlreadyExpired("Access".to_string())),
        AccessState::Inactive | AccessState::Absent => Err(AppError::AuthorizationDenied(
            "no access to this product".to_string(),
        )),
    }
}

/// Signs `(content, expiry)` pairs for the video CDN. Stateless.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: i64,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self, content: &str, expires_at: i64) -> AppResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        mac.update(content.as_bytes());
        mac.update(b":");
        mac.update(expires_at.to_string().as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, content: &str, now: NaiveDateTime) -> AppResult<SignedUrl> {
        let expires_at = now.and_utc().timestamp() + STREAM_URL_TTL_SECS;
        let signature = hex::encode(self.mac(content, expires_at)?.finalize().into_bytes());
        Ok(SignedUrl {
            url: format!(
                "{}/{}?expires={}&signature={}",
                self.base_url,
                content.trim_start_matches('/'),
                expires_at,
                signature
            ),
            expires_at,
        })
    }

    /// Edge-side check of a URL produced by [`UrlSigner::sign`].
    pub fn verify(
        &self,
        content: &str,
        expires_at: i64,
        signature: &str,
        now: NaiveDateTime,
    ) -> AppResult<()> {
        if now.and_utc().timestamp() >= expires_at {
            return Err(AppError::AlreadyExpired("Stream URL".to_string()));
        }
        let expected =
            hex::decode(signature).map_err(|_| AppError::SignatureInvalid("malformed signature".into()))?;
        self.mac(content, expires_at)?
            .verify_slice(&expected)
            .map_err(|_| AppError::SignatureInvalid("stream signature mismatch".into()))
    }
}

/// Signed URL for a lesson's video. Preview lessons skip the access check.
pub fn stream_url(
    conn: &mut SqliteConnection,
    signer: &UrlSigner,
    user_id: Option<&str>,
    lesson_id: &str,
    now: NaiveDateTime,
) -> AppResult<SignedUrl> {
    let lesson = store::find_lesson(conn, lesson_id)?
        .ok_or_else(|| AppError::NotFound("Lesson".to_string()))?;

    if !lesson.is_preview {
        let user_id = user_id.ok_or(AppError::AuthenticationRequired)?;
        require_live_access(conn, user_id, &lesson.product_id, now)?;
    }

    signer.sign(&lesson.video_path, now)
}

fn downloadable_product(conn: &mut SqliteConnection, product_id: &str) -> AppResult<Product> {
    let product = store::find_product(conn, product_id)?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;
    if product.file_url.is_none() {
        return Err(AppError::NotFound("Download".to_string()));
    }
    Ok(product)
}

pub fn issue_download_token(
    conn: &mut SqliteConnection,
    user_id: &str,
    product_id: &str,
    now: NaiveDateTime,
) -> AppResult<(DownloadToken, Product)> {
    let product = downloadable_product(conn, product_id)?;
    require_live_access(conn, user_id, product_id, now)?;

    let token = DownloadToken::new(user_id.to_string(), product_id.to_string(), now);
    store::insert_download_token(conn, &token)?;

    tracing::info!(user_id, product_id, token_id = %token.id, "download token issued");
    Ok((token, product))
}

#[derive(Debug, Clone)]
pub struct Redemption {
    pub download_url: String,
    pub version: Option<String>,
    pub remaining_downloads: i32,
}

/// Consumes one download from the token. The counter moves only through a
/// conditional update, so concurrent redemptions cannot exceed the cap.
/// Expiry is checked before the download count.
fn redemption_blocked(token: &DownloadToken, now: NaiveDateTime) -> Option<AppError> {
    if now >= token.expires_at {
        Some(AppError::AlreadyExpired("Download token".to_string()))
    } else if token.download_count >= token.max_downloads {
        Some(AppError::LimitExceeded)
    } else {
        None
    }
}

pub fn redeem_download_token(
    conn: &mut SqliteConnection,
    user_id: &str,
    token_id: &str,
    product_id: &str,
    now: NaiveDateTime,
) -> AppResult<Redemption> {
    let product = downloadable_product(conn, product_id)?;

    let token = store::find_download_token(conn, token_id)?
        .ok_or_else(|| AppError::NotFound("Download token".to_string()))?;
    if token.product_id != product_id {
        return Err(AppError::NotFound("Download token".to_string()));
    }
    if token.user_id != user_id {
        return Err(AppError::AuthorizationDenied(
            "download token was issued to another user".to_string(),
        ));
    }
    if let Some(err) = redemption_blocked(&token, now) {
        return Err(err);
    }
    require_live_access(conn, user_id, product_id, now)?;

    let (consumed, token) = conn.immediate_transaction(|conn| {
        let consumed = store::try_consume_download(conn, token_id, product_id, now)?;
        store::find_download_token(conn, token_id).map(|token| (consumed, token))
    })?;

    let token = match token {
        Some(token) if consumed => token,
        // Lost the race: report whichever limit the stored token now hits.
        Some(token) => {
            return Err(redemption_blocked(&token, now).unwrap_or(AppError::LimitExceeded))
        }
        None => return Err(AppError::NotFound("Download token".to_string())),
    };

    tracing::info!(
        user_id,
        product_id,
        token_id,
        download_count = token.download_count,
        "download token redeemed"
    );

    Ok(Redemption {
        download_url: product.file_url.unwrap_or_default(),
        version: product.version,
        remaining_downloads: token.remaining(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn signed_url_embeds_expiry_and_verifies() {
        let signer = UrlSigner::new("secret", "https://cdn.example.com/");
        let signed = signer.sign("courses/a/intro.m3u8", now()).unwrap();

        let expected_expiry = now().and_utc().timestamp() + STREAM_URL_TTL_SECS;
        assert_eq!(signed.expires_at, expected_expiry);
        assert!(signed
            .url
            .starts_with("https://cdn.example.com/courses/a/intro.m3u8?expires="));

        let signature = signed.url.rsplit("signature=").next().unwrap();
        assert!(signer
            .verify("courses/a/intro.m3u8", signed.expires_at, signature, now())
            .is_ok());
        assert!(signer
            .verify("courses/b/intro.m3u8", signed.expires_at, signature, now())
            .is_err());
        assert!(signer
            .verify("courses/a/intro.m3u8", signed.expires_at + 1, signature, now())
            .is_err());
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = UrlSigner::new("secret", "https://cdn.example.com");
        assert_eq!(
            signer.sign("v.mp4", now()).unwrap(),
            signer.sign("v.mp4", now()).unwrap()
        );
    }

    #[test]
    fn exhausted_and_expired_token_reports_expiry() {
        let mut token = DownloadToken::new("U1".into(), "ebook-A".into(), now());
        assert!(redemption_blocked(&token, now()).is_none());

        token.download_count = token.max_downloads;
        assert!(matches!(
            redemption_blocked(&token, now()),
            Some(AppError::LimitExceeded)
        ));

        let after_expiry = token.expires_at;
        assert!(matches!(
            redemption_blocked(&token, after_expiry),
            Some(AppError::AlreadyExpired(_))
        ));
    }

    #[test]
    fn expired_stream_url_is_rejected() {
        let signer = UrlSigner::new("secret", "https://cdn.example.com");
        let signed = signer.sign("v.mp4", now()).unwrap();
        let signature = signed.url.rsplit("signature=").next().unwrap();
        let later = now() + chrono::Duration::seconds(STREAM_URL_TTL_SECS);
        assert!(matches!(
            signer.verify("v.mp4", signed.expires_at, signature, later),
            Err(AppError::AlreadyExpired(_))
        ));
    }
}
