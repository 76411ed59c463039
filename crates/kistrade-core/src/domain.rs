use std::fmt::{Debug, Display, Formatter};

use serde::Deserialize;

use crate::error::KisError;
use crate::materialize::CodeTable;

/// Trading environment a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Live trading.
    Real,
    /// Paper trading.
    Virtual,
}

impl Domain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Virtual => "virtual",
        }
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value slot per domain; the virtual slot only exists when configured.
#[derive(Debug, Clone)]
pub struct DomainMap<T> {
    real: T,
    virtual_: Option<T>,
}

impl<T> DomainMap<T> {
    pub fn new(real: T, virtual_: Option<T>) -> Self {
        Self { real, virtual_ }
    }

    pub fn get(&self, domain: Domain) -> Option<&T> {
        match domain {
            Domain::Real => Some(&self.real),
            Domain::Virtual => self.virtual_.as_ref(),
        }
    }

    pub fn has_virtual(&self) -> bool {
        self.virtual_.is_some()
    }

    pub fn map<U>(&self, mut f: impl FnMut(Domain, &T) -> U) -> DomainMap<U> {
        DomainMap {
            real: f(Domain::Real, &self.real),
            virtual_: self.virtual_.as_ref().map(|value| f(Domain::Virtual, value)),
        }
    }
}

/// Credential triple identifying a caller to the vendor API.
///
/// `Debug` output is redacted; the key material only leaves the process
/// inside vendor requests.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AppKey {
    id: String,
    #[serde(rename = "appkey")]
    app_key: String,
    #[serde(rename = "secretkey")]
    secret_key: String,
}

impl AppKey {
    pub fn new(
        id: impl Into<String>,
        app_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            app_key: app_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read `<PREFIX>_ID`, `<PREFIX>_APPKEY` and `<PREFIX>_SECRETKEY`.
    pub fn from_env(prefix: &str) -> Result<Self, KisError> {
        let read = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            std::env::var(&name)
                .map_err(|_| KisError::configuration(format!("environment variable {name} is not set")))
        };

        Ok(Self::new(read("ID")?, read("APPKEY")?, read("SECRETKEY")?))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl Debug for AppKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppKey")
            .field("id", &"<redacted>")
            .field("app_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Brokerage account number: 8-digit account plus 2-digit product code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountNumber {
    number: String,
    product_code: String,
}

impl AccountNumber {
    /// Parse `"12345678-01"` or `"1234567801"`.
    pub fn parse(input: &str) -> Result<Self, KisError> {
        let digits: String = input.trim().chars().filter(|ch| *ch != '-').collect();
        if digits.len() != 10 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(KisError::configuration(format!(
                "account number must be 10 digits (XXXXXXXX-XX): '{input}'"
            )));
        }

        let (number, product_code) = digits.split_at(8);
        Ok(Self {
            number: number.to_owned(),
            product_code: product_code.to_owned(),
        })
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }
}

impl Display for AccountNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.number, self.product_code)
    }
}

impl<'de> Deserialize<'de> for AccountNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// Exchange a product is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    Krx,
    Nasdaq,
    Nyse,
    Amex,
    Tyo,
    Hkex,
    Sse,
    Szse,
    Hnx,
    Hsx,
}

impl Market {
    pub const ALL: [Market; 10] = [
        Self::Krx,
        Self::Nasdaq,
        Self::Nyse,
        Self::Amex,
        Self::Tyo,
        Self::Hkex,
        Self::Sse,
        Self::Szse,
        Self::Hnx,
        Self::Hsx,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Krx => "KRX",
            Self::Nasdaq => "NASDAQ",
            Self::Nyse => "NYSE",
            Self::Amex => "AMEX",
            Self::Tyo => "TYO",
            Self::Hkex => "HKEX",
            Self::Sse => "SSE",
            Self::Szse => "SZSE",
            Self::Hnx => "HNX",
            Self::Hsx => "HSX",
        }
    }

    pub fn parse(identifier: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|market| market.as_str().eq_ignore_ascii_case(identifier.trim()))
    }

    pub const fn is_domestic(self) -> bool {
        matches!(self, Self::Krx)
    }

    /// Product type code used by the product lookup endpoints.
    pub const fn product_type_code(self) -> &'static str {
        match self {
            Self::Krx => "300",
            Self::Nasdaq => "512",
            Self::Nyse => "513",
            Self::Amex => "529",
            Self::Tyo => "515",
            Self::Hkex => "501",
            Self::Sse => "551",
            Self::Szse => "552",
            Self::Hnx => "507",
            Self::Hsx => "508",
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor exchange codes seen across quote, order and product payloads.
pub static EXCHANGE_CODES: CodeTable = CodeTable::new(
    "exchange",
    &[
        ("STK", "KRX"),
        ("KSQ", "KRX"),
        ("KNX", "KRX"),
        ("KRX", "KRX"),
        ("NAS", "NASDAQ"),
        ("NASD", "NASDAQ"),
        ("BAQ", "NASDAQ"),
        ("NYS", "NYSE"),
        ("NYSE", "NYSE"),
        ("BAY", "NYSE"),
        ("AMS", "AMEX"),
        ("AMEX", "AMEX"),
        ("BAA", "AMEX"),
        ("TSE", "TYO"),
        ("TKSE", "TYO"),
        ("HKS", "HKEX"),
        ("SEHK", "HKEX"),
        ("SHS", "SSE"),
        ("SHAA", "SSE"),
        ("SZS", "SZSE"),
        ("SZAA", "SZSE"),
        ("HNX", "HNX"),
        ("HSX", "HSX"),
        ("HASE", "HNX"),
        ("VNSE", "HSX"),
    ],
);
