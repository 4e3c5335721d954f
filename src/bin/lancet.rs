use lancet::cli::pipeline_runner::PipelineRunner;
use lancet::cli::{build_cli, set_log_level, CliParams};
use log::error;

fn main() {
    let mut app = build_cli();
    let matches = app.clone().get_matches();

    match matches.subcommand() {
        Some(("pipeline", sub_matches)) => {
            set_log_level(sub_matches);

            let params = match CliParams::from_matches(sub_matches) {
                Ok(params) => params,
                Err(err) => {
                    error!("Invalid pipeline options: {err:#}");
                    std::process::exit(1);
                }
            };

            let mut runner = PipelineRunner::new(params);
            if let Err(err) = runner.run() {
                error!("Pipeline failed: {err:#}");
                std::process::exit(1);
            }
        }
        _ => {
            app.print_help().unwrap();
            println!();
        }
    }
}
