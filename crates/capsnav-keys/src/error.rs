use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum KeymapError {
    #[error("Chord {chord} is bound more than once")]
    #[diagnostic(code(capsnav::keys::duplicate_chord))]
    DuplicateChord { chord: String },

    #[error("Chord {chord} has an empty output sequence")]
    #[diagnostic(code(capsnav::keys::empty_sequence))]
    EmptySequence { chord: String },

    #[error("Unknown key: {key}")]
    #[diagnostic(
        code(capsnav::keys::unknown_key),
        help("use a short name like `E`, `Semicolon` or `PageUp`, or a raw name like `KEY_E`")
    )]
    UnknownKey { key: String },
}
