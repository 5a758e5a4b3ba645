//
// main.rs
//
// Copyright (C) 2026 Jonathan Marc Bearak
//

use std::env;

use phpmd_ls::backend;

fn print_usage() {
    println!(
        "phpmd-ls {}, a language server reporting PHP Mess Detector violations.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: phpmd-ls [OPTIONS]

Available options:

--stdio                      Start the LSP server using stdio transport
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;

    for arg in argv {
        match arg.as_str() {
            "--stdio" => use_stdio = true,
            "--version" => {
                println!("phpmd-ls {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();

    backend::start_lsp().await
}
