pub mod feed;
pub mod fetcher;

pub use feed::{FeedEvent, Position, PositionFeed, Subscription};
pub use fetcher::GtfsRealtimeFeed;
