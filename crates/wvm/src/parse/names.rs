//! Reader for the `name` custom section.

use wasmparser::{BinaryReader, BinaryReaderError};

use crate::error::Error;

/// Subsection id of the function name map.
pub const FUNCTION_NAMES: u8 = 1;

/// A function index paired with its diagnostic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomName {
    pub index: u32,
    pub name: String,
}

/// Read the function names from the payload of a `name` custom section.
///
/// Only the first subsection is read and it must be the function name
/// map.
pub fn read_names(data: &[u8]) -> Result<Vec<CustomName>, Error> {
    let mut reader = BinaryReader::new(data, 0);

    let ty = reader.read_u8().map_err(malformed)?;
    if ty != FUNCTION_NAMES {
        return Err(Error::MalformedCustomSection(format!(
            "unexpected name subsection type {ty}"
        )));
    }
    let _len = reader.read_var_u32().map_err(malformed)?;

    let count = reader.read_var_u32().map_err(malformed)?;
    let mut names = Vec::with_capacity((count as usize).min(data.len()));
    for _ in 0..count {
        let index = reader.read_var_u32().map_err(malformed)?;
        let name = reader.read_string().map_err(malformed)?;
        names.push(CustomName {
            index,
            name: name.to_string(),
        });
    }
    Ok(names)
}

fn malformed(err: BinaryReaderError) -> Error {
    Error::MalformedCustomSection(err.message().to_string())
}
