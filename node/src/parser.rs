use clap::{App, Arg, ArgMatches};

pub fn parse_command_line<'a>() -> ArgMatches<'a> {
    App::new("node")
        .version(crate_version!())
        .author("Conductor Authors <conductor@cpssd.net>")
        .about("Runs a conductor scheduling cluster in one process")
        .arg(
            Arg::with_name("nodes")
                .long("nodes")
                .short("n")
                .help("Number of nodes to start")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .short("t")
                .help("Worker threads per node")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("jobs")
                .long("jobs")
                .short("j")
                .help("Number of task instances to submit")
                .takes_value(true)
                .required(false),
        )
        .get_matches()
}
