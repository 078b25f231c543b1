use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported encoding '{0}'. Use utf-8, utf-16, utf-16le, utf-16be or latin1")]
    UnsupportedEncoding(String),

    #[error("{path} is not valid {encoding}")]
    Decode { path: String, encoding: String },
}

/// Text encodings accepted by `:file -enc` and `-i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEncoding {
    Utf8,
    /// Byte order taken from the BOM, little endian without one.
    Utf16,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl ScriptEncoding {
    pub fn from_name(name: &str) -> Result<Self, ScriptError> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(ScriptEncoding::Utf8),
            "utf-16" | "utf16" | "unicode" => Ok(ScriptEncoding::Utf16),
            "utf-16le" | "utf16le" => Ok(ScriptEncoding::Utf16Le),
            "utf-16be" | "utf16be" => Ok(ScriptEncoding::Utf16Be),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(ScriptEncoding::Latin1),
            _ => Err(ScriptError::UnsupportedEncoding(name.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ScriptEncoding::Utf8 => "utf-8",
            ScriptEncoding::Utf16 => "utf-16",
            ScriptEncoding::Utf16Le => "utf-16le",
            ScriptEncoding::Utf16Be => "utf-16be",
            ScriptEncoding::Latin1 => "latin1",
        }
    }

    /// Decode `bytes`, dropping a leading byte order mark.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            ScriptEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                String::from_utf8(bytes.to_vec()).ok()
            }
            ScriptEncoding::Utf16 => match bytes {
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                _ => decode_utf16(bytes, u16::from_le_bytes),
            },
            ScriptEncoding::Utf16Le => {
                let bytes = bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes);
                decode_utf16(bytes, u16::from_le_bytes)
            }
            ScriptEncoding::Utf16Be => {
                let bytes = bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes);
                decode_utf16(bytes, u16::from_be_bytes)
            }
            ScriptEncoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Load a script from a file
///
/// # Parameters
/// * `filename` - The name of the file to load from
/// * `encoding` - Encoding name, utf-8 when `None`
///
/// # Returns
/// * `Ok(String)` - The decoded script content
/// * `Err(ScriptError)` - Missing file, unreadable file or undecodable content
pub fn load_script_from_file(filename: &str, encoding: Option<&str>) -> Result<String, ScriptError> {
    let encoding = match encoding {
        Some(name) => ScriptEncoding::from_name(name)?,
        None => ScriptEncoding::Utf8,
    };

    let path = Path::new(filename);
    if !path.exists() {
        return Err(ScriptError::NotFound(filename.to_string()));
    }

    let bytes = fs::read(path).map_err(|source| ScriptError::Io {
        path: filename.to_string(),
        source,
    })?;
    debug!(
        "[script::load_script_from_file] {} bytes from {} as {}",
        bytes.len(),
        filename,
        encoding.name()
    );

    encoding.decode(&bytes).ok_or_else(|| ScriptError::Decode {
        path: filename.to_string(),
        encoding: encoding.name().to_string(),
    })
}
