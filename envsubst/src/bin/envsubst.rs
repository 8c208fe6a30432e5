use std::io::{BufWriter, Write};

use arrrg::CommandLine;

use envsubst::{expand_stream, AllowList, EnvironmentVariableProvider};

const USAGE: &str = "USAGE: envsubst [OPTIONS] [VARIABLE-NAMES...]
       VARIABLE-NAMES are comma-separated and can be specified in shell format or bare.";

#[derive(Clone, Debug, Default, Eq, PartialEq, arrrg_derive::CommandLine)]
struct Options {
    #[arrrg(
        flag,
        "Print the accumulated variable names, one per line, instead of filtering stdin."
    )]
    variables: bool,
    #[arrrg(flag, "Print the version string and exit.")]
    version: bool,
}

fn main() {
    let (options, free) = Options::from_command_line(USAGE);
    if options.version {
        println!("envsubst {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    let mut allow_list = AllowList::new();
    for arg in &free {
        for rejected in allow_list.extend_from_argument(arg) {
            eprintln!("envsubst: failed to process '{}'", rejected);
        }
    }
    let stdout = std::io::stdout();
    let mut stdout = BufWriter::new(stdout.lock());
    let result = if options.variables {
        allow_list.dump(&mut stdout)
    } else {
        let stdin = std::io::stdin();
        let mut stdin = stdin.lock();
        let vars = EnvironmentVariableProvider::new();
        expand_stream(&mut stdin, &mut stdout, &allow_list, &vars)
    };
    if let Err(err) = result {
        eprintln!("envsubst: {}", err);
        std::process::exit(1);
    }
    if let Err(err) = stdout.flush() {
        eprintln!("envsubst: {}", err);
        std::process::exit(1);
    }
}
