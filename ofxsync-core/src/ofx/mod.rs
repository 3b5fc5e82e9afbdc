//! OFX 1.x protocol: request documents and response parsing

pub mod element;
pub mod request;
pub mod response;
pub mod sgml;

pub use element::Element;
pub use request::RequestBuilder;
pub use response::{parse_statement, OfxResponse, Statement, StatementRecord, Status};
