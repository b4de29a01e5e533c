pub mod recommendation;
pub mod report;
pub mod valuation;
