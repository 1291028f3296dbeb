pub mod handlers;

use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("datacatalog")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Get a cached artifact, or reserve the right to compute it")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Config file layered over the global and project files"),
        )
        .arg(
            Arg::new("database-url")
                .long("database-url")
                .value_name("URL")
                .global(true)
                .help("Overrides database.url"),
        )
        .subcommand(Command::new("init").about("Create the catalog tables"))
        .subcommand(cmd_reserve())
        .subcommand(cmd_extend())
        .subcommand(cmd_release())
        .subcommand(cmd_get())
        .subcommand(cmd_tag())
}

fn cmd_reserve() -> Command {
    with_key_args(Command::new("reserve"))
        .about("Return the tagged artifact, or try to acquire the reservation")
        .arg(owner_arg())
        .arg(metadata_arg())
}

fn cmd_extend() -> Command {
    with_key_args(Command::new("extend"))
        .about("Heartbeat: renew a reservation and show who holds it")
        .arg(owner_arg())
        .arg(metadata_arg())
}

fn cmd_release() -> Command {
    with_key_args(Command::new("release")).about("Release a reservation, whoever holds it")
}

fn cmd_get() -> Command {
    with_key_args(Command::new("get")).about("Show the current reservation, or null")
}

fn cmd_tag() -> Command {
    with_key_args(Command::new("tag"))
        .about("Store an artifact and point the tag at it")
        .arg(
            Arg::new("artifact-id")
                .long("artifact-id")
                .value_name("ID")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(metadata_arg())
}

fn with_key_args(cmd: Command) -> Command {
    ["project", "domain", "name", "version", "tag"]
        .into_iter()
        .fold(cmd, |cmd, field| {
            cmd.arg(
                Arg::new(field)
                    .long(field)
                    .required(true)
                    .action(ArgAction::Set),
            )
        })
}

fn owner_arg() -> Arg {
    Arg::new("owner")
        .long("owner")
        .required(true)
        .help("Identity of the caller contending for the reservation")
}

fn metadata_arg() -> Arg {
    Arg::new("metadata")
        .long("metadata")
        .value_name("JSON")
        .help("Opaque JSON stored with the row")
}
