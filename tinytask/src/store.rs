use crate::{EventSequence, Result, TinytaskError};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// File name used when the caller does not pick one
pub const DEFAULT_FILE: &str = "my_macro.json";

/// What a save actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The sequence was written to `path`
    Saved { path: PathBuf, events: usize },
    /// The sequence was empty; nothing was written
    NothingToSave,
}

/// Save a sequence as a JSON array.
///
/// An empty sequence is not an error, but nothing is written and the caller
/// gets [`SaveOutcome::NothingToSave`].
pub fn save<P: AsRef<Path>>(sequence: &EventSequence, path: P) -> Result<SaveOutcome> {
    let path = path.as_ref();
    if sequence.is_empty() {
        warn!("No events to save");
        return Ok(SaveOutcome::NothingToSave);
    }

    info!("Saving {} events to {:?}", sequence.len(), path);
    let json = sequence.to_json()?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;

    Ok(SaveOutcome::Saved {
        path: path.to_path_buf(),
        events: sequence.len(),
    })
}

/// Load and validate a sequence saved with [`save`]
pub fn load<P: AsRef<Path>>(path: P) -> Result<EventSequence> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TinytaskError::NotFound(path.to_path_buf()),
        _ => TinytaskError::Io(e),
    })?;

    let sequence = EventSequence::from_json(&json).map_err(|e| match e {
        TinytaskError::Format(msg) => {
            TinytaskError::Format(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })?;
    info!("Loaded {} events from {:?}", sequence.len(), path);
    Ok(sequence)
}
