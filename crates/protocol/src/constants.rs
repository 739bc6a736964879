/// Number of decimal digits used to encode a chunk index in its file name.
pub const CHUNK_INDEX_WIDTH: usize = 5;

/// Largest chunk index representable with [`CHUNK_INDEX_WIDTH`] digits.
pub const MAX_CHUNK_INDEX: u32 = 99_999;

/// Separator between the logical file name and the chunk index.
pub const CHUNK_SEPARATOR: &str = ".part.";

/// Public URL prefix under which assembled files are served by the host.
pub const COMPLETED_URL_PREFIX: &str = "/uploads/completed/";

/// Value used for a missing upload name or upload id.
pub const DEFAULT_SESSION_COMPONENT: &str = "default";
