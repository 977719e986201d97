//! Core scanning primitives
//!
//! This module contains the fundamental building blocks of the front end:
//! - Chars: per-version XML character classes
//! - Cursor: buffered entity scan cursor with lookahead and refill
//! - Lexical: name/char-ref/comment/PI primitives built on the cursor
//! - Decl: XML and text declaration pseudo-attribute reader

pub mod chars;
pub mod cursor;
pub mod decl;
pub mod lexical;
