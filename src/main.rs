use clap::Parser;

use viewtrack_lib::catalog::DEFAULT_LINKS_PER_TASK;

#[derive(Parser, Debug)]
#[command(name = "viewtrack")]
#[command(about = "Runs a camera-tracked video viewing session against the simulated host")]
#[command(version)]
struct Args {
    /// Participant launch URL, e.g. https://host/?video=video3&workerId=w-17
    launch_url: Option<String>,

    /// Print the participant link sheet for this base URL instead of running a session
    #[arg(long, value_name = "BASE_URL")]
    links: Option<String>,

    /// Links per task in the sheet
    #[arg(long, default_value_t = DEFAULT_LINKS_PER_TASK, env = "VIEWTRACK_LINKS_PER_TASK")]
    per_task: usize,
}

fn main() {
    let args = Args::parse();

    let result = match &args.links {
        Some(base_url) => viewtrack_lib::print_survey_links(base_url, args.per_task),
        None => viewtrack_lib::run(args.launch_url.as_deref()),
    };
    if let Err(err) = result {
        eprintln!("viewtrack: {err:#}");
        std::process::exit(1);
    }
}
