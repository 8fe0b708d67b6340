/*!
 * velen - Main Entry Point
 *
 * One binary for every entry point:
 * - velen prepare / run / destroy / shell / status
 * - velen-prepare, velen-run, velen-destroy, velen-shell via symlinks
 */

use tracing::debug;
use velen::cli::{dispatch, execute, report, usage_exit};
use velen::{init_tracing, VelenConfig};

fn main() {
    init_tracing();

    let command = match dispatch(std::env::args_os().collect()) {
        Ok(command) => command,
        Err(e) => std::process::exit(usage_exit(&e)),
    };
    debug!(?command, "Parsed command line");

    let config = match VelenConfig::load() {
        Ok(config) => config,
        Err(e) => std::process::exit(report(e)),
    };

    std::process::exit(execute(command, &config));
}
