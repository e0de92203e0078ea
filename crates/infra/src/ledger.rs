//! External inventory ledger: sheet numbering, pick and pay submission.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use feedpost_core::{LocationCode, LotNo, MaterialCode, ProductCode, SheetNo};
use feedpost_reconcile::SheetType;

/// Result token the ledger returns for an accepted posting.
pub const LEDGER_OK: &str = "OK";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger api error status={status}: {message}")]
    Api { status: u16, message: String },

    #[error("ledger decode error: {0}")]
    Decode(String),
}

/// Pick (consumption) line. `cumulative_qty` is the new running total, not the delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickRequest {
    pub sheet_type: SheetType,
    pub sheet_no: SheetNo,
    pub inv_date: NaiveDate,
    pub product_code: ProductCode,
    pub material_code: MaterialCode,
    pub cumulative_qty: f64,
    pub sign: i8,
    pub lot_no: LotNo,
    pub source_location: LocationCode,
    pub creator: String,
}

/// Pay (output) line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub sheet_type: SheetType,
    pub sheet_no: SheetNo,
    pub inv_date: NaiveDate,
    pub product_code: ProductCode,
    pub cumulative_qty: f64,
    pub old_qty: f64,
    pub sign: i8,
    pub lot_no: LotNo,
    pub dest_location: LocationCode,
    pub storage_slot: String,
    pub creator: String,
}

/// Raw ledger answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub result: String,
}

impl LedgerReceipt {
    pub fn ok() -> Self {
        Self {
            result: LEDGER_OK.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.trim().eq_ignore_ascii_case(LEDGER_OK)
    }
}

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn next_sheet_no(
        &self,
        sheet_type: SheetType,
        date: NaiveDate,
    ) -> Result<SheetNo, LedgerError>;

    async fn post_pick(&self, request: &PickRequest) -> Result<LedgerReceipt, LedgerError>;

    async fn post_pay(&self, request: &PayRequest) -> Result<LedgerReceipt, LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    sequence: HashMap<SheetType, u32>,
    picks: Vec<PickRequest>,
    pays: Vec<PayRequest>,
    rejected_materials: HashSet<MaterialCode>,
    reject_pay: bool,
    offline: bool,
}

/// In-memory ledger for tests/dev.
///
/// Accepts everything unless told otherwise; `set_offline(true)` makes every
/// call fail with a transport error.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_material(&self, material: MaterialCode) {
        if let Ok(mut s) = self.inner.lock() {
            s.rejected_materials.insert(material);
        }
    }

    pub fn accept_material(&self, material: &MaterialCode) {
        if let Ok(mut s) = self.inner.lock() {
            s.rejected_materials.remove(material);
        }
    }

    pub fn set_reject_pay(&self, reject: bool) {
        if let Ok(mut s) = self.inner.lock() {
            s.reject_pay = reject;
        }
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut s) = self.inner.lock() {
            s.offline = offline;
        }
    }

    pub fn picks(&self) -> Vec<PickRequest> {
        self.inner.lock().map(|s| s.picks.clone()).unwrap_or_default()
    }

    pub fn pays(&self) -> Vec<PayRequest> {
        self.inner.lock().map(|s| s.pays.clone()).unwrap_or_default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>, LedgerError> {
        let s = self
            .inner
            .lock()
            .map_err(|_| LedgerError::Transport("lock poisoned".to_string()))?;
        if s.offline {
            return Err(LedgerError::Transport("ledger offline".to_string()));
        }
        Ok(s)
    }
}

fn rejection() -> LedgerReceipt {
    LedgerReceipt {
        result: "REJECTED".to_string(),
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn next_sheet_no(
        &self,
        sheet_type: SheetType,
        date: NaiveDate,
    ) -> Result<SheetNo, LedgerError> {
        let mut s = self.state()?;
        let seq = s.sequence.entry(sheet_type).or_insert(0);
        *seq += 1;
        let prefix = match sheet_type {
            SheetType::Pick => "PK",
            SheetType::Pay => "PY",
        };
        SheetNo::new(format!("{prefix}{}{:04}", date.format("%Y%m%d"), seq))
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn post_pick(&self, request: &PickRequest) -> Result<LedgerReceipt, LedgerError> {
        let mut s = self.state()?;
        if s.rejected_materials.contains(&request.material_code) {
            return Ok(rejection());
        }
        s.picks.push(request.clone());
        Ok(LedgerReceipt::ok())
    }

    async fn post_pay(&self, request: &PayRequest) -> Result<LedgerReceipt, LedgerError> {
        let mut s = self.state()?;
        if s.reject_pay {
            return Ok(rejection());
        }
        s.pays.push(request.clone());
        Ok(LedgerReceipt::ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetNoResponse {
    sheet_no: SheetNo,
}

/// JSON-over-HTTP ledger.
///
/// - `POST {base}/sheets/{pick|pay}/next?date=YYYY-MM-DD` → `{"sheetNo": ".."}`
/// - `POST {base}/picks` / `POST {base}/pays` → `{"result": "OK" | <reason>}`
#[derive(Debug, Clone)]
pub struct HttpLedger {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, LedgerError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Api {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn submit<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<LedgerReceipt, LedgerError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Self::decode(resp).await
    }
}

#[async_trait::async_trait]
impl Ledger for HttpLedger {
    async fn next_sheet_no(
        &self,
        sheet_type: SheetType,
        date: NaiveDate,
    ) -> Result<SheetNo, LedgerError> {
        let date_s = date.format("%Y-%m-%d").to_string();
        let resp = self
            .http
            .post(self.url(&format!("sheets/{}/next", sheet_type.as_str())))
            .query(&[("date", date_s.as_str())])
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: SheetNoResponse = Self::decode(resp).await?;
        Ok(body.sheet_no)
    }

    async fn post_pick(&self, request: &PickRequest) -> Result<LedgerReceipt, LedgerError> {
        self.submit("picks", request).await
    }

    async fn post_pay(&self, request: &PayRequest) -> Result<LedgerReceipt, LedgerError> {
        self.submit("pays", request).await
    }
}
