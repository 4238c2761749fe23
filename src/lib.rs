pub mod account;
pub mod cache;
pub mod caches;
pub mod drop_info;
pub mod drop_matrix;
pub mod drop_pattern;
pub mod drop_report;
pub mod error;
pub mod handlers;
pub mod item;
pub mod migrations;
pub mod models;
pub mod pattern_matrix;
pub mod ref_db;
pub mod refresh;
pub mod shim;
pub mod stage;
pub mod time_range;
pub mod trend;

use std::sync::Arc;

use clickhouse::Client;

use account::AccountService;
use caches::Caches;
use drop_info::DropInfoService;
use drop_matrix::DropMatrixService;
use drop_pattern::DropPatternElementService;
use drop_report::DropReportService;
use item::ItemService;
use pattern_matrix::PatternMatrixService;
use ref_db::RefDb;
use shim::ShimService;
use stage::StageService;
use time_range::TimeRangeService;
use trend::TrendService;

#[derive(Clone)]
pub struct AppState {
    pub caches: Arc<Caches>,
    pub items: Arc<ItemService>,
    pub stages: Arc<StageService>,
    pub accounts: Arc<AccountService>,
    pub drop_matrix: Arc<DropMatrixService>,
    pub pattern_matrix: Arc<PatternMatrixService>,
    pub trend: Arc<TrendService>,
}

impl AppState {
    /// Wire the service graph. The cache registry loads `properties` here
    /// and is read-only afterwards.
    pub fn new(ch: Client, ref_db: Arc<RefDb>) -> anyhow::Result<Self> {
        let caches = Arc::new(Caches::new(&ref_db)?);

        let items = Arc::new(ItemService::new(ref_db.clone(), caches.clone()));
        let stages = Arc::new(StageService::new(ref_db.clone(), caches.clone()));
        let accounts = Arc::new(AccountService::new(ref_db.clone(), caches.clone()));

        let time_range = Arc::new(TimeRangeService::new(ref_db.clone(), caches.clone()));
        let drop_info = Arc::new(DropInfoService::new(
            ref_db.clone(),
            time_range.clone(),
            caches.clone(),
        ));
        let drop_report = Arc::new(DropReportService::new(ch));
        let drop_pattern = Arc::new(DropPatternElementService::new(
            ref_db.clone(),
            caches.clone(),
        ));
        let shim = Arc::new(ShimService::new(
            items.clone(),
            stages.clone(),
            drop_info.clone(),
            drop_pattern,
        ));

        let drop_matrix = Arc::new(DropMatrixService::new(
            time_range.clone(),
            drop_info.clone(),
            drop_report.clone(),
            ref_db.clone(),
            caches.clone(),
            shim.clone(),
        ));
        let pattern_matrix = Arc::new(PatternMatrixService::new(
            time_range.clone(),
            drop_report.clone(),
            ref_db,
            caches.clone(),
            shim.clone(),
        ));
        let trend = Arc::new(TrendService::new(time_range, drop_report, caches.clone(), shim));

        Ok(Self {
            caches,
            items,
            stages,
            accounts,
            drop_matrix,
            pattern_matrix,
            trend,
        })
    }
}
