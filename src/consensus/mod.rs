// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

mod race;
mod rules;
mod sort;
mod validate;

pub use race::*;
pub use rules::*;
pub use sort::*;
pub use validate::*;
