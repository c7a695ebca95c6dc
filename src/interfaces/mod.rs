//! Outer adapters: CSV replay input and the account report.

pub mod csv;
