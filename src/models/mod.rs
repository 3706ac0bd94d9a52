pub mod page;
pub mod search;

pub use page::RawPage;
pub use search::{DocumentDetail, DocumentUpsert, Posting, PostingUpsert, ScoredDoc, SearchResult};
