mod article;
mod feed;
mod playback;

pub use article::{Article, NewArticle};
pub use feed::{Feed, NewFeed};
pub use playback::{PlaybackCommand, PlaybackMode};
