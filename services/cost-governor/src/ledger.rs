//! Cost ledger
//!
//! Tracks every billable model call and rolls it up per day, per service,
//! per model, and in total. In-memory counters are authoritative for the
//! process lifetime; when a KV client is configured the same increments are
//! mirrored with atomic floating-point adds so they survive restarts. A
//! failed persist logs a warning — the in-memory counter still reflects the
//! call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use services_common::constants::keys;
use services_common::{KernelError, KernelResult, KvStore};

/// Price assumed for models missing from the price table (units / 1M tokens)
pub const DEFAULT_MODEL_PRICE: f64 = 0.1;

/// Budget alerts kept on the KV list
const ALERT_KEEP: usize = 100;

/// Budget configuration
#[derive(Debug, Clone)]
pub struct CostLedgerConfig {
    /// Daily budget in currency units
    pub daily_budget: f64,
    /// Monthly budget in currency units
    pub monthly_budget: f64,
}

impl Default for CostLedgerConfig {
    fn default() -> Self {
        Self {
            daily_budget: 50.0,
            monthly_budget: 1500.0,
        }
    }
}

/// Derived budget snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BudgetState {
    pub daily_cost: f64,
    pub daily_budget: f64,
    pub daily_utilization: f64,
    pub is_daily_exceeded: bool,
    pub monthly_cost: f64,
    pub monthly_budget: f64,
    pub monthly_utilization: f64,
    pub is_monthly_exceeded: bool,
}

/// Ledger counters snapshot
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatistics {
    pub total_calls: u64,
    pub alert_count: u64,
    pub total_cost: f64,
    pub daily_cost: f64,
    pub monthly_cost: f64,
    pub daily_budget: f64,
    pub monthly_budget: f64,
}

#[derive(Default)]
struct MemState {
    /// date (`YYYYMMDD`) → service → cost
    by_day: FxHashMap<String, FxHashMap<String, f64>>,
    by_model: FxHashMap<String, f64>,
    total: f64,
}

/// Real-time spend accounting across aggregation axes
pub struct CostLedger {
    kv: Option<Arc<dyn KvStore>>,
    daily_budget: f64,
    monthly_budget: f64,
    prices: RwLock<FxHashMap<String, f64>>,
    mem: RwLock<MemState>,
    total_calls: AtomicU64,
    alert_count: AtomicU64,
}

impl CostLedger {
    /// Build a ledger; without a KV client counters reset on restart
    pub fn new(kv: Option<Arc<dyn KvStore>>, config: CostLedgerConfig) -> KernelResult<Self> {
        if config.daily_budget <= 0.0 {
            return Err(KernelError::BadInput(format!(
                "daily budget must be > 0: {}",
                config.daily_budget
            )));
        }
        if config.monthly_budget <= 0.0 {
            return Err(KernelError::BadInput(format!(
                "monthly budget must be > 0: {}",
                config.monthly_budget
            )));
        }

        if kv.is_none() {
            warn!("no kv client configured, cost counters will not survive restarts");
        }

        let prices: FxHashMap<String, f64> = [
            ("deepseek-chat", 0.1),
            ("qwen-next-80b", 1.0),
            ("deepseek-r1", 0.5),
            ("qwen-scholar", 1.0),
            ("local-model", 0.0),
        ]
        .into_iter()
        .map(|(model, price)| (model.to_string(), price))
        .collect();

        info!(
            daily_budget = config.daily_budget,
            monthly_budget = config.monthly_budget,
            "cost ledger initialized"
        );

        Ok(Self {
            kv,
            daily_budget: config.daily_budget,
            monthly_budget: config.monthly_budget,
            prices: RwLock::new(prices),
            mem: RwLock::new(MemState::default()),
            total_calls: AtomicU64::new(0),
            alert_count: AtomicU64::new(0),
        })
    }

    /// Record one billable call and return its cost
    pub async fn track(
        &self,
        service: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> KernelResult<f64> {
        if input_tokens < 0 {
            return Err(KernelError::BadInput(format!(
                "input tokens must be >= 0: {input_tokens}"
            )));
        }
        if output_tokens < 0 {
            return Err(KernelError::BadInput(format!(
                "output tokens must be >= 0: {output_tokens}"
            )));
        }

        let total_tokens = input_tokens + output_tokens;
        let price = self.model_price(model);
        let cost = (total_tokens as f64 / 1_000_000.0) * price;

        let today = today_str();

        // Grouped in-memory increment; concurrent tracks sum without lost
        // updates because all four axes move under one write lock.
        {
            let mut mem = self.mem.write();
            *mem.by_day
                .entry(today.clone())
                .or_default()
                .entry(service.to_string())
                .or_insert(0.0) += cost;
            *mem.by_model.entry(model.to_string()).or_insert(0.0) += cost;
            mem.total += cost;
        }

        if let Some(kv) = &self.kv {
            let result = async {
                kv.incr_by_float(&format!("{}{today}", keys::COST_DAILY_PREFIX), cost)
                    .await?;
                kv.incr_by_float(&format!("{}{service}", keys::COST_SERVICE_PREFIX), cost)
                    .await?;
                kv.incr_by_float(&format!("{}{model}", keys::COST_MODEL_PREFIX), cost)
                    .await?;
                kv.incr_by_float(keys::COST_TOTAL, cost).await?;
                Ok::<(), KernelError>(())
            }
            .await;

            if let Err(e) = result {
                warn!(error = %e, "failed to persist cost increment, in-memory counters still hold it");
            }
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let daily_cost = self.daily_cost(None).await;
        if daily_cost > self.daily_budget {
            self.record_budget_alert(daily_cost).await;
        }

        debug!(
            service,
            model,
            cost,
            input_tokens,
            output_tokens,
            daily_cost,
            "tracked model call"
        );

        Ok(cost)
    }

    /// Cost accumulated for a day (today when `date` is `None`)
    pub async fn daily_cost(&self, date: Option<NaiveDate>) -> f64 {
        let date_str = date.map_or_else(today_str, format_date);
        self.daily_record(&date_str).await.unwrap_or(0.0)
    }

    /// Daily bucket distinguished from an absent record
    pub async fn daily_record(&self, date_str: &str) -> Option<f64> {
        if let Some(kv) = &self.kv {
            match kv
                .get_f64(&format!("{}{date_str}", keys::COST_DAILY_PREFIX))
                .await
            {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, date = date_str, "kv daily read failed, using in-memory bucket");
                }
            }
        }

        self.mem
            .read()
            .by_day
            .get(date_str)
            .map(|services| services.values().sum())
    }

    /// Cost accumulated for a month (`YYYYMM`; current month when `None`)
    ///
    /// Sums the daily buckets for days 1–31; there is no separate monthly
    /// counter to drift from the daily ones.
    pub async fn monthly_cost(&self, year_month: Option<&str>) -> f64 {
        let ym = year_month.map_or_else(
            || Local::now().format("%Y%m").to_string(),
            ToString::to_string,
        );

        let mut total = 0.0;
        for day in 1..=31u32 {
            let date_str = format!("{ym}{day:02}");
            if let Some(cost) = self.daily_record(&date_str).await {
                total += cost;
            }
        }
        total
    }

    /// Cumulative cost for a model
    pub async fn model_cost(&self, model: &str) -> f64 {
        if let Some(kv) = &self.kv {
            match kv
                .get_f64(&format!("{}{model}", keys::COST_MODEL_PREFIX))
                .await
            {
                Ok(Some(value)) => return value,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, model, "kv model read failed, using in-memory bucket");
                }
            }
        }
        self.mem.read().by_model.get(model).copied().unwrap_or(0.0)
    }

    /// Cost a service accumulated on a day (today when `None`)
    pub async fn cost_by_service(&self, service: &str, date: Option<&str>) -> f64 {
        let date_str = date.map_or_else(today_str, ToString::to_string);
        self.mem
            .read()
            .by_day
            .get(&date_str)
            .and_then(|services| services.get(service))
            .copied()
            .unwrap_or(0.0)
    }

    /// Grand total across all services and models
    pub async fn total_cost(&self) -> f64 {
        if let Some(kv) = &self.kv {
            match kv.get_f64(keys::COST_TOTAL).await {
                Ok(Some(value)) => return value,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "kv total read failed, using in-memory total");
                }
            }
        }
        self.mem.read().total
    }

    /// Daily buckets for the trailing `days`, most recent first
    pub async fn history(&self, days: u32) -> KernelResult<Vec<(String, f64)>> {
        if days == 0 {
            return Err(KernelError::BadInput("days must be > 0".to_string()));
        }

        let mut history = Vec::with_capacity(days as usize);
        for i in 0..days {
            let date = Local::now().date_naive() - chrono::Duration::days(i64::from(i));
            let date_str = format_date(date);
            let cost = self.daily_record(&date_str).await.unwrap_or(0.0);
            history.push((date_str, cost));
        }
        Ok(history)
    }

    /// Today's per-service cost breakdown
    pub fn breakdown(&self) -> FxHashMap<String, f64> {
        self.mem
            .read()
            .by_day
            .get(&today_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Current budget snapshot
    pub async fn budget_state(&self) -> BudgetState {
        let daily_cost = self.daily_cost(None).await;
        let monthly_cost = self.monthly_cost(None).await;

        BudgetState {
            daily_cost,
            daily_budget: self.daily_budget,
            daily_utilization: daily_cost / self.daily_budget,
            is_daily_exceeded: daily_cost > self.daily_budget,
            monthly_cost,
            monthly_budget: self.monthly_budget,
            monthly_utilization: monthly_cost / self.monthly_budget,
            is_monthly_exceeded: monthly_cost > self.monthly_budget,
        }
    }

    /// Price for a model, defaulting for unknown ones
    #[must_use]
    pub fn model_price(&self, model: &str) -> f64 {
        self.prices
            .read()
            .get(model)
            .copied()
            .unwrap_or(DEFAULT_MODEL_PRICE)
    }

    /// Register or update a model price (units / 1M tokens)
    pub fn set_model_price(&self, model: &str, price: f64) -> KernelResult<()> {
        if model.is_empty() {
            return Err(KernelError::BadInput("model name must not be empty".to_string()));
        }
        if price < 0.0 {
            return Err(KernelError::BadInput(format!("price must be >= 0: {price}")));
        }

        self.prices.write().insert(model.to_string(), price);
        info!(model, price, "model price registered");
        Ok(())
    }

    /// Drop one daily bucket (today when `None`)
    pub async fn reset_daily(&self, date: Option<NaiveDate>) {
        let date_str = date.map_or_else(today_str, format_date);

        if let Some(kv) = &self.kv {
            if let Err(e) = kv
                .delete(&format!("{}{date_str}", keys::COST_DAILY_PREFIX))
                .await
            {
                warn!(error = %e, date = %date_str, "failed to delete kv daily bucket");
            }
        }
        self.mem.write().by_day.remove(&date_str);

        info!(date = %date_str, "daily cost reset");
    }

    /// Clear all in-memory records and counters; KV keys are left intact
    pub fn clear_all(&self) {
        let mut mem = self.mem.write();
        mem.by_day.clear();
        mem.by_model.clear();
        mem.total = 0.0;
        drop(mem);

        self.total_calls.store(0, Ordering::Relaxed);
        self.alert_count.store(0, Ordering::Relaxed);
        info!("all cost records cleared");
    }

    pub async fn statistics(&self) -> LedgerStatistics {
        LedgerStatistics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            alert_count: self.alert_count.load(Ordering::Relaxed),
            total_cost: self.total_cost().await,
            daily_cost: self.daily_cost(None).await,
            monthly_cost: self.monthly_cost(None).await,
            daily_budget: self.daily_budget,
            monthly_budget: self.monthly_budget,
        }
    }

    #[must_use]
    pub fn daily_budget(&self) -> f64 {
        self.daily_budget
    }

    #[must_use]
    pub fn monthly_budget(&self) -> f64 {
        self.monthly_budget
    }

    async fn record_budget_alert(&self, daily_cost: f64) {
        self.alert_count.fetch_add(1, Ordering::Relaxed);

        let alert = json!({
            "type": "budget_exceeded",
            "daily_cost": daily_cost,
            "daily_budget": self.daily_budget,
            "excess": daily_cost - self.daily_budget,
            "timestamp": Local::now().to_rfc3339(),
        });

        if let Some(kv) = &self.kv {
            if let Err(e) = kv
                .lpush_trim(keys::COST_ALERTS, &alert.to_string(), ALERT_KEEP)
                .await
            {
                warn!(error = %e, "failed to persist budget alert");
            }
        }

        warn!(
            daily_cost,
            daily_budget = self.daily_budget,
            excess = daily_cost - self.daily_budget,
            "daily budget exceeded"
        );
    }
}

fn today_str() -> String {
    Local::now().format("%Y%m%d").to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
