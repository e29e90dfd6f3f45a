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
use std::error::Error;
use std::fs;
use std::sync::Arc;

use clap::{arg, Arg, ArgMatches, Command};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
//
use ncsvm::bytecode::Program;
use ncsvm::tree::ExpressionTree;
use ncsvm::vm::{Execution, ExecutionContext, RoutineTable};

fn main() -> Result<(), Box<dyn Error>> {
    // Parse command-line arguments
    let matches = Command::new("ncsvm")
        .about("Compiled script tool")
        .version("0.3.1")
        .subcommand_required(true)
        .arg(arg!(--verbose "Show verbose output"))
        .subcommand(
            Command::new("disassemble")
                .about("Print the instruction listing of a compiled script")
                .arg(Arg::new("file").required(true))
                .visible_alias("d"),
        )
        .subcommand(
            Command::new("decompile")
                .about("Reconstruct functions from a compiled script")
                .arg(Arg::new("file").required(true))
                .visible_alias("t"),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a compiled script against an empty routine table")
                .arg(Arg::new("file").required(true))
                .visible_alias("r"),
        )
        .get_matches();
    // Extract top-level flags
    let verbose = matches.is_present("verbose");
    // Initialise logging
    if verbose {
        init_logging(LevelFilter::Debug);
    }
    // Dispatch on outcome
    let ok = match matches.subcommand() {
        Some(("disassemble", args)) => disassemble(args),
        Some(("decompile", args)) => decompile(args),
        Some(("run", args)) => run(args),
        _ => unreachable!(),
    }?;
    // Determine appropriate exit code
    let exitcode = if ok { 0 } else { 1 };
    // Done
    std::process::exit(exitcode);
}

/// Read and parse the program named by the subcommand argument.
fn load_program(args: &ArgMatches) -> Result<Program, Box<dyn Error>> {
    let filename = args.get_one::<String>("file").unwrap();
    let bytes = fs::read(filename)?;
    let program = Program::from_bytes(filename, &bytes)?;
    Ok(program)
}

/// Print one instruction per line, keyed by byte offset.
fn disassemble(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let program = load_program(args)?;
    for ins in program.instructions() {
        println!("{:08x}: {}", ins.offset, ins);
    }
    Ok(true)
}

/// Reconstruct the function forest and print each signature.
fn decompile(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let program = load_program(args)?;
    let routines = RoutineTable::new();
    let tree = ExpressionTree::from_program(&program, &routines);
    for function in tree.functions() {
        let name = if function.name.is_empty() { "sub" } else { &function.name };
        println!(
            "{} @{:08x}: {} in, {} out, returns {:?}, {} expressions",
            name,
            function.offset,
            function.in_argument_types.len(),
            function.out_argument_types.len(),
            function.return_type,
            tree.block_expressions(function.block).len()
        );
    }
    println!("{} globals", tree.globals().len());
    Ok(true)
}

/// Execute the script and print its exit value.
fn run(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let program = Arc::new(load_program(args)?);
    let routines = RoutineTable::new();
    let ctx = ExecutionContext::new(&routines);
    let mut execution = Execution::new(program, ctx);
    let exit = execution.run()?;
    println!("{}", exit);
    Ok(true)
}

/// Initialise logging using a suitable pattern.
pub fn init_logging(level: LevelFilter) {
    let encoder = PatternEncoder::new("[{l}] {m}{n}");
    //
    let stdout = ConsoleAppender::builder().encoder(Box::new(encoder)).build();
    //
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .unwrap();
    //
    let _handle = log4rs::init_config(config).unwrap();
}
