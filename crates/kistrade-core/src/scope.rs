//! Account and product scopes bound to a client.
//!
//! Scopes are flat handles composed by construction: [`AccountScope`] knows an
//! account, [`ProductScope`] knows a product, [`AccountProductScope`] knows
//! both. Capabilities are exposed through [`HasAccount`] and [`HasProduct`].

use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use time::Date;

use crate::cache::Expiry;
use crate::client::KisClient;
use crate::domain::{AccountNumber, Domain, Market, EXCHANGE_CODES};
use crate::error::KisError;
use crate::http_client::HttpResponse;
use crate::materialize::{
    BindContext, Binder, DecodeError, FieldDescriptor, FieldValue, Materialized, Owner, Record,
    Schema, Shape, ValueTransform, VENDOR_DATE,
};
use crate::request::{ApiRequest, FormInjector};

const PRODUCT_INFO_TTL: Duration = Duration::from_secs(60 * 60);

const DOMESTIC_INFO_PATH: &str = "/uapi/domestic-stock/v1/quotations/search-stock-info";
const DOMESTIC_INFO_TR_ID: &str = "CTPF1002R";
const OVERSEAS_INFO_PATH: &str = "/uapi/overseas-price/v1/quotations/search-info";
const OVERSEAS_INFO_TR_ID: &str = "CTPF1702R";

pub trait HasAccount {
    fn account_number(&self) -> &AccountNumber;
}

pub trait HasProduct {
    fn symbol(&self) -> &str;

    fn market(&self) -> Market;

    /// `PDNO` / `PRDT_TYPE_CD` form fields for this product.
    fn product_form(&self) -> ProductForm {
        ProductForm::new(self.symbol(), self.market())
    }
}

impl FormInjector for AccountNumber {
    fn form_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("CANO", self.number().to_owned()),
            ("ACNT_PRDT_CD", self.product_code().to_owned()),
        ]
    }
}

/// Product identification form fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductForm {
    symbol: String,
    market: Market,
}

impl ProductForm {
    pub fn new(symbol: impl Into<String>, market: Market) -> Self {
        Self {
            symbol: symbol.into(),
            market,
        }
    }
}

impl FormInjector for ProductForm {
    fn form_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PDNO", self.symbol.clone()),
            ("PRDT_TYPE_CD", self.market.product_type_code().to_owned()),
        ]
    }
}

static PRODUCT_INFO_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "ProductInfo",
        vec![
            FieldDescriptor::new("std_pdno", ValueTransform::Text).from_path(&["output", "std_pdno"]),
            FieldDescriptor::new("name", ValueTransform::Text).from_path(&["output", "prdt_name"]),
            FieldDescriptor::new("name_en", ValueTransform::Text)
                .from_path(&["output", "prdt_eng_name"])
                .with_default(FieldValue::text("")),
            FieldDescriptor::new("domestic_market", ValueTransform::Code(&EXCHANGE_CODES))
                .from_path(&["output", "mket_id_cd"])
                .optional(),
            FieldDescriptor::new("overseas_market", ValueTransform::Code(&EXCHANGE_CODES))
                .from_path(&["output", "ovrs_excg_cd"])
                .optional(),
            FieldDescriptor::new("domestic_listed_on", ValueTransform::Date(VENDOR_DATE))
                .from_path(&["output", "scts_mket_lstg_dt"])
                .optional(),
            FieldDescriptor::new("overseas_listed_on", ValueTransform::Date(VENDOR_DATE))
                .from_path(&["output", "lstg_dt"])
                .optional(),
        ],
    )
});

/// Reference information for one listed product.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    std_pdno: String,
    name: String,
    name_en: String,
    market: Market,
    listed_on: Option<Date>,
    owner: Owner,
    response: Option<Arc<HttpResponse>>,
}

impl ProductInfo {
    /// Standard (ISIN) product code.
    pub fn std_pdno(&self) -> &str {
        &self.std_pdno
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_en(&self) -> &str {
        &self.name_en
    }

    pub const fn market(&self) -> Market {
        self.market
    }

    pub const fn listed_on(&self) -> Option<Date> {
        self.listed_on
    }

    pub fn client(&self) -> Option<KisClient> {
        self.owner.client()
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_deref()
    }
}

impl Shape for ProductInfo {
    fn schema() -> &'static Schema {
        &PRODUCT_INFO_SCHEMA
    }

    fn from_record(mut record: Record) -> Result<Self, DecodeError> {
        let identifier = match record.opt_text("domestic_market")? {
            Some(identifier) => Some(identifier),
            None => record.opt_text("overseas_market")?,
        };
        let market = identifier
            .as_deref()
            .and_then(Market::parse)
            .ok_or_else(|| DecodeError::MissingField {
                shape: "ProductInfo",
                field: "market",
                path: String::from("output.mket_id_cd|output.ovrs_excg_cd"),
            })?;

        let listed_on = match record.opt_date("domestic_listed_on")? {
            Some(date) => Some(date),
            None => record.opt_date("overseas_listed_on")?,
        };

        Ok(Self {
            std_pdno: record.text("std_pdno")?,
            name: record.text("name")?,
            name_en: record.text("name_en")?,
            market,
            listed_on,
            owner: Owner::default(),
            response: None,
        })
    }
}

impl Materialized for ProductInfo {
    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn owner_mut(&mut self) -> &mut Owner {
        &mut self.owner
    }

    fn bind_children(&mut self, _binder: &mut Binder<'_>) {}

    fn attach_response(&mut self, response: Arc<HttpResponse>) {
        self.response = Some(response);
    }
}

impl BindContext for ProductInfo {
    fn bind_context(&mut self, binder: &mut Binder<'_>) {
        binder.bind(self);
    }
}

/// Look up product reference info, shared through the client cache.
pub fn product_info(
    client: &KisClient,
    symbol: &str,
    market: Market,
) -> Result<Arc<ProductInfo>, KisError> {
    let key = format!("product_info:{market}:{symbol}");
    if let Some(info) = client.cache().get::<Arc<ProductInfo>>(&key) {
        return Ok(info);
    }

    let (path, tr_id) = if market.is_domestic() {
        (DOMESTIC_INFO_PATH, DOMESTIC_INFO_TR_ID)
    } else {
        (OVERSEAS_INFO_PATH, OVERSEAS_INFO_TR_ID)
    };
    let request = ApiRequest::get(path)
        .with_tr_id(tr_id)
        .with_domain(Domain::Real)
        .with_form(&ProductForm::new(symbol, market));

    let info = Arc::new(client.fetch::<ProductInfo>(&request)?);
    client
        .cache()
        .set(key, Arc::clone(&info), Some(Expiry::After(PRODUCT_INFO_TTL)));
    Ok(info)
}

/// Once-per-instance memoization cell for a product lookup.
#[derive(Debug, Default)]
struct InfoCell(Mutex<Option<Arc<ProductInfo>>>);

impl InfoCell {
    fn get_or_fetch(
        &self,
        client: &KisClient,
        symbol: &str,
        market: Market,
    ) -> Result<Arc<ProductInfo>, KisError> {
        let mut cell = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = cell.as_ref() {
            return Ok(Arc::clone(info));
        }

        let info = product_info(client, symbol, market)?;
        *cell = Some(Arc::clone(&info));
        Ok(info)
    }
}

#[derive(Debug, Clone)]
pub struct AccountScope {
    client: KisClient,
    account: AccountNumber,
}

impl AccountScope {
    pub fn new(client: KisClient, account: AccountNumber) -> Self {
        Self { client, account }
    }

    pub fn client(&self) -> &KisClient {
        &self.client
    }

    pub fn product(&self, symbol: impl Into<String>, market: Market) -> AccountProductScope {
        AccountProductScope::new(self.client.clone(), self.account.clone(), symbol, market)
    }
}

impl HasAccount for AccountScope {
    fn account_number(&self) -> &AccountNumber {
        &self.account
    }
}

#[derive(Debug)]
pub struct ProductScope {
    client: KisClient,
    symbol: String,
    market: Market,
    info: InfoCell,
}

impl ProductScope {
    pub fn new(client: KisClient, symbol: impl Into<String>, market: Market) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            market,
            info: InfoCell::default(),
        }
    }

    pub fn client(&self) -> &KisClient {
        &self.client
    }

    /// Product reference info, fetched at most once per scope.
    pub fn info(&self) -> Result<Arc<ProductInfo>, KisError> {
        self.info.get_or_fetch(&self.client, &self.symbol, self.market)
    }

    pub fn with_account(&self, account: AccountNumber) -> AccountProductScope {
        AccountProductScope::new(self.client.clone(), account, self.symbol.clone(), self.market)
    }
}

impl HasProduct for ProductScope {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn market(&self) -> Market {
        self.market
    }
}

#[derive(Debug)]
pub struct AccountProductScope {
    client: KisClient,
    account: AccountNumber,
    symbol: String,
    market: Market,
    info: InfoCell,
}

impl AccountProductScope {
    pub fn new(
        client: KisClient,
        account: AccountNumber,
        symbol: impl Into<String>,
        market: Market,
    ) -> Self {
        Self {
            client,
            account,
            symbol: symbol.into(),
            market,
            info: InfoCell::default(),
        }
    }

    pub fn client(&self) -> &KisClient {
        &self.client
    }

    pub fn info(&self) -> Result<Arc<ProductInfo>, KisError> {
        self.info.get_or_fetch(&self.client, &self.symbol, self.market)
    }
}

impl HasAccount for AccountProductScope {
    fn account_number(&self) -> &AccountNumber {
        &self.account
    }
}

impl HasProduct for AccountProductScope {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn market(&self) -> Market {
        self.market
    }
}
