//! CLI Exit Code Registry
//!
//! Single source of truth for `formsync` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                           |
//! |------|---------------------------------------------------|
//! | 0    | Success                                           |
//! | 1    | General error (unspecified)                       |
//! | 2    | Usage error (bad args, unreadable input)          |
//! | 3    | Pasted rows do not have the expected column count |
//! | 4    | A record save failed, fallback included           |
//! | 5    | A chunked write stopped part way                  |
//! | 6    | Config file unreadable or invalid                 |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing or unreadable input.
pub const EXIT_USAGE: u8 = 2;

/// Column count mismatch. Rows are still printed by `parse`.
pub const EXIT_PARSE_MISMATCH: u8 = 3;

/// Save failed (upsert error, or update-then-insert fallback failed).
pub const EXIT_SAVE_FAILED: u8 = 4;

/// Chunked write failed after zero or more chunks were stored.
pub const EXIT_BATCH_PARTIAL: u8 = 5;

/// Config file could not be read or failed validation.
pub const EXIT_CONFIG: u8 = 6;
