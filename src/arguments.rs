use clap::{Parser, ValueEnum};

use crate::shared_options::SharedOptions;
use crate::{s3, transfer};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub(crate) struct Arguments {
    /// Storage access key
    #[clap(long, short = 'l', value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub login: String,

    /// Storage secret key
    #[clap(long, short = 'p', value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub password: String,

    /// Operation to perform
    #[clap(long, short = 'c', value_enum)]
    pub command: Operation,

    /// Bucket to operate on
    #[clap(long, short = 'b', value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub bucket: String,

    /// Remote object key (get) or local directory (upload)
    #[clap(long, short = 's', value_parser = clap::builder::NonEmptyStringValueParser::new(), value_hint = clap::ValueHint::AnyPath)]
    pub src: Option<String>,

    /// Local destination directory (get)
    #[clap(long, short = 'd', default_value = ".", value_hint = clap::ValueHint::DirPath)]
    pub dest: std::path::PathBuf,

    /// Endpoint URL of the storage service
    #[clap(long, short = 'e', default_value = s3::DEFAULT_ENDPOINT)]
    pub endpoint: http::uri::Uri,

    /// Override the storage region
    #[clap(long, short = 'R')]
    pub region: Option<String>,

    #[clap(flatten)]
    pub transfer: transfer::OptionsTransfer,

    #[clap(flatten)]
    pub list: transfer::OptionsList,

    #[clap(flatten)]
    pub shared: SharedOptions,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub(crate) enum Operation {
    /// Download one object into the destination directory
    Get,
    /// Upload the files directly inside a local directory
    Upload,
    /// Download every object in the bucket into the current directory
    Download,
    /// Print every object key in the bucket
    List,
}

pub enum MainResult {
    Success,
    ErrorArguments,
    ErrorSomeOperationsFailed,
    Cancelled,
}

impl MainResult {
    pub fn from_error_count(count: u32) -> MainResult {
        match count {
            0 => MainResult::Success,
            _ => MainResult::ErrorSomeOperationsFailed,
        }
    }

    /// --help and --version also surface as clap errors; only genuine
    /// usage mistakes take the usage exit code
    pub fn from_clap_error(error: &clap::Error) -> MainResult {
        if error.use_stderr() {
            MainResult::ErrorArguments
        } else {
            MainResult::Success
        }
    }
}

impl std::process::Termination for MainResult {
    fn report(self) -> std::process::ExitCode {
        match self {
            Self::Success => std::process::ExitCode::SUCCESS,
            Self::ErrorArguments => std::process::ExitCode::from(1),
            Self::ErrorSomeOperationsFailed => std::process::ExitCode::from(2),
            Self::Cancelled => std::process::ExitCode::from(3),
        }
    }
}

impl Arguments {
    /// Flags the selected operation needs but the invocation didn't supply
    pub(crate) fn missing_argument(&self) -> Option<&'static str> {
        match self.command {
            Operation::Get if self.src.is_none() => {
                Some("get requires --src with the remote object key")
            }
            Operation::Upload if self.src.is_none() => {
                Some("upload requires --src with the local directory to upload")
            }
            _ => None,
        }
    }

    pub(crate) async fn run(&self, client: &s3::Client) -> MainResult {
        match self.command {
            Operation::Get => {
                let key = self.src.as_deref().expect("validated before dispatch");
                transfer::get_one(key, &self.dest, &self.bucket, client, &self.shared, &self.transfer).await
            }
            Operation::Upload => {
                let source = self.src.as_deref().expect("validated before dispatch");
                transfer::upload(std::path::Path::new(source), &self.bucket, client, &self.shared, &self.transfer).await
            }
            Operation::Download => {
                let current_dir = std::path::Path::new(".");
                transfer::download(&self.bucket, current_dir, client, &self.shared, &self.transfer).await
            }
            Operation::List => transfer::list(&self.bucket, client, &self.list).await,
        }
    }
}

#[test]
fn reject_missing_required_flags() {
    assert!(Arguments::try_parse_from(["pho3", "-c", "list", "-b", "photos", "-p", "secret"]).is_err());
    assert!(Arguments::try_parse_from(["pho3", "-l", "key", "-p", "secret", "-b", "photos"]).is_err());
    assert!(Arguments::try_parse_from(["pho3", "-l", "key", "-p", "secret", "-c", "list"]).is_err());
    assert!(Arguments::try_parse_from(["pho3", "-l", "key", "-c", "list", "-b", "photos"]).is_err());
}

#[test]
fn reject_empty_required_values() {
    assert!(Arguments::try_parse_from(["pho3", "-l", "", "-p", "secret", "-c", "list", "-b", "photos"]).is_err());
    assert!(Arguments::try_parse_from(["pho3", "-l", "key", "-p", "secret", "-c", "list", "-b", ""]).is_err());
}

#[test]
fn reject_unknown_command() {
    let parsed = Arguments::try_parse_from(["pho3", "-l", "key", "-p", "secret", "-c", "sync", "-b", "photos"]);
    assert!(parsed.is_err());
}

#[test]
fn get_and_upload_require_a_source() {
    let get = Arguments::try_parse_from(["pho3", "-l", "k", "-p", "s", "-c", "get", "-b", "photos"])
        .unwrap();
    assert!(get.missing_argument().is_some());

    let get = Arguments::try_parse_from([
        "pho3", "-l", "k", "-p", "s", "-c", "get", "-b", "photos", "-s", "2024/cat.jpg", "-d", "/tmp",
    ])
    .unwrap();
    assert!(get.missing_argument().is_none());

    let upload = Arguments::try_parse_from(["pho3", "-l", "k", "-p", "s", "-c", "upload", "-b", "photos"])
        .unwrap();
    assert!(upload.missing_argument().is_some());

    let list = Arguments::try_parse_from(["pho3", "-l", "k", "-p", "s", "-c", "list", "-b", "photos"])
        .unwrap();
    assert!(list.missing_argument().is_none());
    let download = Arguments::try_parse_from(["pho3", "-l", "k", "-p", "s", "-c", "download", "-b", "photos"])
        .unwrap();
    assert!(download.missing_argument().is_none());
}

#[test]
fn parse_failures_take_the_usage_exit_code() {
    let missing = Arguments::try_parse_from(["pho3", "-c", "list", "-b", "photos"]).unwrap_err();
    assert!(matches!(
        MainResult::from_clap_error(&missing),
        MainResult::ErrorArguments
    ));

    let unknown = Arguments::try_parse_from(["pho3", "-l", "k", "-p", "s", "-c", "sync", "-b", "photos"])
        .unwrap_err();
    assert!(matches!(
        MainResult::from_clap_error(&unknown),
        MainResult::ErrorArguments
    ));

    let help = Arguments::try_parse_from(["pho3", "--help"]).unwrap_err();
    assert!(matches!(MainResult::from_clap_error(&help), MainResult::Success));
}

#[test]
fn endpoint_defaults_to_local_storage() {
    let args = Arguments::try_parse_from(["pho3", "-l", "k", "-p", "s", "-c", "list", "-b", "photos"])
        .unwrap();
    assert_eq!(args.endpoint, http::uri::Uri::from_static(s3::DEFAULT_ENDPOINT));
}
