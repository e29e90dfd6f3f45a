// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::sync::Arc;

use crate::bytecode::Program;

mod errors;
mod machine;
mod routine;
mod variable;

pub use errors::*;
pub use machine::*;
pub use routine::*;
pub use variable::*;

/// Execute a program from its entry point.  The context carries the
/// routine table and caller identity; the returned value is the
/// program's exit code.
pub fn run(program: Arc<Program>, ctx: ExecutionContext) -> Result<i32, ExecutionError> {
    Execution::new(program, ctx).run()
}

/// Resume a saved continuation.  The continuation's captured globals
/// and locals are restored onto a fresh stack and execution proceeds
/// from the captured offset.
pub fn run_continuation(
    state: Arc<Continuation>,
    ctx: ExecutionContext,
) -> Result<i32, ExecutionError> {
    Execution::resume(state, ctx).run()
}
