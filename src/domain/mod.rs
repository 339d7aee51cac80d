pub mod article;
pub mod links;
pub mod preview;
pub mod status;
pub mod task;

pub use article::{ArticleResult, DownloadLink};
pub use preview::PreviewResult;
pub use status::ScrapeStatus;
pub use task::{ScrapeTask, StrategyKind};
