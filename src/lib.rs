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

/// Functionality related to compiled script containers.  This
/// includes parsing a binary container into an offset-keyed
/// instruction table, the instruction model itself (opcodes, type
/// suffixes, operands) and serialization back into bytes.
pub mod bytecode;
/// Functionality related to reconstructing a structured view of a
/// compiled script.  This converts an instruction table into a forest
/// of functions whose bodies are blocks of typed expressions, with
/// control flow expressed as labels, gotos, conditionals and returns.
pub mod tree;
pub mod util;
/// Functionality related to executing compiled scripts.  This
/// includes the typed value model, the operand stack interpreter,
/// routine dispatch and coroutine-style save states.
pub mod vm;
