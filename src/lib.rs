// Copyright 2025 0xjcf
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # treestate
//! A hierarchical statechart runtime: a declarative [`Design`] of nested
//! states, guarded event handlers, timed repeats and async effects is
//! compiled into a live [`Machine`] that processes events serially,
//! maintains a tree of active states, runs entry/exit side effects and
//! publishes updates to subscribers.
//!
//! ```rust
//! use treestate::{to, Design, Machine, StateConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let design = Design::new(())
//!     .initial("low")
//!     .state("low", StateConfig::new().on("TOGGLE", to("high")))
//!     .state("high", StateConfig::new().on("TOGGLE", to("low")));
//!
//! let machine = Machine::new(design)?;
//! machine.init().await?;
//! machine.send("TOGGLE").await?;
//! assert!(machine.is_in("high"));
//! # Ok(())
//! # }
//! ```
//!
//! The instance is single-threaded-cooperative: events are strictly FIFO,
//! handler chains run one at a time, and nothing here is `Send`. Designs
//! that use repeat or async effects spawn local tasks and must run inside
//! a [`tokio::task::LocalSet`].

pub mod core;
pub mod timer;

// Re-export key types for easier use by consumers of the crate.
pub use core::MAX_TRANSITIONS;
pub use core::{action, send, to};
pub use core::{Design, DesignError, Event, Handler, Item, Repeat, StateConfig, Task};
pub use core::{Machine, MachineError, Subscription, WhenValue};
pub use core::{NodeKind, StateNode, Tree};

pub mod prelude {
    //! Convenient imports for building designs and driving machines.
    pub use crate::core::{
        action, send, to, Design, DesignError, Event, Handler, Item, Machine, MachineError,
        Repeat, StateConfig, Subscription, Task, WhenValue,
    };
}
