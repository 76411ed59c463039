use std::fmt::{Debug, Formatter};
use std::sync::LazyLock;
use std::time::Duration;

use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::materialize::{
    DecodeError, FieldDescriptor, FieldValue, Record, Schema, Shape, ValueTransform,
    VENDOR_DATETIME,
};

static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "AccessToken",
        vec![
            FieldDescriptor::new("token", ValueTransform::Text).from_path(&["access_token"]),
            FieldDescriptor::new("token_type", ValueTransform::Text)
                .with_default(FieldValue::text("Bearer")),
            FieldDescriptor::new("expires_at", ValueTransform::Timestamp(VENDOR_DATETIME))
                .from_path(&["access_token_token_expired"]),
            FieldDescriptor::new("validity_secs", ValueTransform::Integer)
                .from_path(&["expires_in"]),
        ],
    )
});

/// Bearer token issued for one credential domain.
///
/// Immutable; a refresh replaces the whole value. `Debug` never prints the
/// token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    token_type: String,
    expires_at: OffsetDateTime,
    validity_secs: i64,
}

impl AccessToken {
    pub fn new(
        token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: OffsetDateTime,
        validity_secs: i64,
    ) -> Self {
        Self {
            token: token.into(),
            token_type: token_type.into(),
            expires_at,
            validity_secs,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub const fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub const fn validity_secs(&self) -> i64 {
        self.validity_secs
    }

    pub fn expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Time left before hard expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        let remaining = self.expires_at - OffsetDateTime::now_utc();
        Duration::try_from(remaining).unwrap_or(Duration::ZERO)
    }

    /// `authorization` header value.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }

    /// Serialize with the vendor's token response keys, so a persisted token
    /// decodes through the same schema as a freshly issued one.
    pub fn to_json(&self) -> Result<Value, time::Error> {
        Ok(json!({
            "access_token": self.token,
            "token_type": self.token_type,
            "access_token_token_expired": VENDOR_DATETIME.format(self.expires_at)?,
            "expires_in": self.validity_secs,
        }))
    }
}

impl Shape for AccessToken {
    fn schema() -> &'static Schema {
        &SCHEMA
    }

    fn from_record(mut record: Record) -> Result<Self, DecodeError> {
        let token = record.text("token")?;
        if token.trim().is_empty() {
            return Err(DecodeError::InvalidValue {
                shape: "AccessToken",
                field: "token",
                raw: token,
                reason: String::from("access token is empty"),
            });
        }

        Ok(Self {
            token,
            token_type: record.text("token_type")?,
            expires_at: record.timestamp("expires_at")?,
            validity_secs: record.integer("validity_secs")?,
        })
    }
}

impl Debug for AccessToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("validity_secs", &self.validity_secs)
            .finish()
    }
}
