use clap::{Args as ClapArgs, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(
    name = "codenav",
    version,
    about = "Cross-repository code intelligence queries over precomputed dumps",
    after_help = r#"Examples:
  codenav serve --store data/codenav.sqlite --bundles data/bundles --repo 1=../api
  codenav request --method find_closest_dumps --params '{"repository_id":1,"commit":"deadbeef...","path":"cmd/main.go"}'
  codenav request --method definitions --params '{"dump_id":42,"path":"cmd/main.go","line":10,"character":4}'
  codenav request --method references --params '{"repository_id":1,"commit":"deadbeef...","dump_id":42,"path":"cmd/main.go","line":10,"character":4,"limit":50}'
  codenav request --method diagnostics --params '{"dump_id":42,"prefix":"pkg/","skip":0,"take":20}'
  codenav request --method help --params '{}'
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
}

#[derive(ClapArgs)]
pub struct DataArgs {
    /// SQLite database holding repositories, commits, dumps and packages.
    #[arg(long, default_value = ".codenav/codenav.sqlite")]
    pub store: PathBuf,
    /// Directory of `<dump_id>.sqlite` bundle files.
    #[arg(long, default_value = ".codenav/bundles")]
    pub bundles: PathBuf,
    /// Local clone used to sync a repository's commit graph, as ID=PATH.
    #[arg(long = "repo", value_name = "ID=PATH")]
    pub repos: Vec<RepoClone>,
}

impl DataArgs {
    pub fn repositories(&self) -> HashMap<i64, PathBuf> {
        self.repos
            .iter()
            .map(|clone| (clone.repository_id, clone.path.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoClone {
    pub repository_id: i64,
    pub path: PathBuf,
}

impl FromStr for RepoClone {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (id, path) = value
            .split_once('=')
            .ok_or_else(|| format!("expected ID=PATH, got {value:?}"))?;
        let repository_id = id
            .trim()
            .parse::<i64>()
            .map_err(|err| format!("invalid repository id {id:?}: {err}"))?;
        if path.is_empty() {
            return Err(format!("missing path for repository {repository_id}"));
        }
        Ok(Self {
            repository_id,
            path: PathBuf::from(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repo_clone() {
        let clone: RepoClone = "7=../src/api".parse().unwrap();
        assert_eq!(clone.repository_id, 7);
        assert_eq!(clone.path, PathBuf::from("../src/api"));
        assert!("api".parse::<RepoClone>().is_err());
        assert!("x=api".parse::<RepoClone>().is_err());
        assert!("3=".parse::<RepoClone>().is_err());
    }

    #[test]
    fn parses_serve_command() {
        let args = Args::try_parse_from([
            "codenav", "serve", "--store", "s.db", "--bundles", "b", "--repo", "1=a", "--repo", "2=b",
        ])
        .unwrap();
        let Command::Serve { data } = args.command else {
            panic!("expected serve");
        };
        assert_eq!(data.store, PathBuf::from("s.db"));
        let repos = data.repositories();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[&2], PathBuf::from("b"));
    }
}
