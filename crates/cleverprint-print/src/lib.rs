// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CleverPrint Print — printer discovery, OS print execution, PDF
// materialization, and the in-memory job spooler.  This crate bridges
// between the core domain types defined in `cleverprint-core` and the host
// operating system's printing facilities.

pub mod executor;
pub mod materialize;
pub mod printers;
pub mod spooler;

pub use executor::{PrintExecutor, SystemPrintExecutor};
pub use materialize::{MaterializedPdf, PdfMaterializer};
pub use printers::list_printers;
pub use spooler::{Spooler, SpoolerStatus};
