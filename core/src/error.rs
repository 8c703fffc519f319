use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Host-level failures. Guest anomalies never show up here; they are traps.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid ELF file: {0}")]
    InvalidElf(&'static str),
    #[error("Image of {len} bytes does not fit in a store at {addr:#x}")]
    ImageTooLarge { addr: u32, len: usize },
    #[error("Region '{name}' at {start:#x} overlaps an existing region")]
    RegionOverlap { name: &'static str, start: u32 },
    #[error("Region '{name}' has zero size")]
    EmptyRegion { name: &'static str },
    #[error("I/O error on '{1}': {0}")]
    IoError(#[source] std::io::Error, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // Debug
    #[error("Repeated breakpoint at {0:#x}")]
    RepeatedBreakpoint(u32),
    #[error("Breakpoint not found at {0:#x}")]
    BreakpointNotFound(u32),

    #[error("Error: {0}")]
    Other(String),
}
