///! Orbital element-set acquisition
///!
///! ## Main Components
///! - `ElementSetSource`: ranked remote sources with embedded fallback
///! - `parser`: two/three-line parsing with checksum and field validation

pub mod fallback;
pub mod parser;
mod source;

pub use fallback::offline_element_sets;
pub use parser::{parse_payload, validate_pair, LineError, ParsedPayload};
pub use source::{
    merge_acquisitions, Acquisition, AcquisitionOrigin, ElementSetSource, ElementSource, HttpSource,
};
