pub mod build_status;
pub mod cache;
pub mod checker;
pub mod compare;
pub mod config;
pub mod deps;
pub mod download;
pub mod error;
pub mod group;
pub mod model;
pub mod obs;
pub mod review;
pub mod testing;

pub use cache::{CachePolicy, CacheStore, InMemoryCacheStore, MemoCache, SqliteCacheStore};
pub use checker::{CheckOutcome, ConsistencyChecker, ScriptChecker};
pub use compare::{compare_projects, CompareOptions, CompareReport};
pub use config::{ArchPair, Config, ReviewSettings};
pub use download::{ProvenanceReader, RpmProvenance};
pub use error::{CacheError, CheckerError, DownloadError, ReviewError, ServiceError};
pub use model::*;
pub use obs::{BuildService, ObsClient};
pub use review::{Finding, PassReport, ReviewEngine, Transition};

