// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Sockline Developers. All rights reserved.
//  https://github.com/sockline/sockline
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Common componentry for the sockline engine.
//!
//! The `sockline-common` crate provides the ambient services shared by the engine crates and
//! their tests:
//!
//! - Tracing initialization driven by the `RUST_LOG` environment variable.
//! - Polling helpers for asserting on asynchronous outcomes in tests.

#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod logging;
pub mod testing;
