//! Interactive command-line front end.
//!
//! Reads prompts from stdin, runs one generation, narrates progress and
//! writes every artifact into the output directory.

pub mod narrator;
pub mod output;
