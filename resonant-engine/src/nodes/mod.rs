// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Concrete node variants.

pub mod io;
pub mod online;
pub mod reservoir;
pub mod ridge;

pub use io::{Input, Output};
pub use online::OnlineReadout;
pub use reservoir::Reservoir;
pub use ridge::Ridge;
