use std::path::Path;

use futures::StreamExt;

use crate::arguments::MainResult;
use crate::cli;
use crate::s3;
use crate::shared_options::SharedOptions;

#[derive(clap::Args, Debug, Clone)]
pub struct OptionsTransfer {
    /// Continue to the next object on error
    #[clap(long, short = 'y')]
    continue_on_error: bool,

    #[clap(flatten)]
    progress: cli::ArgProgress,
}

#[derive(clap::Args, Debug)]
pub struct OptionsList {
    /// Show owner, last-modified and size columns
    #[clap(long, short = 'L')]
    long: bool,
}

fn ctrl_c_cancellation() -> tokio_util::sync::CancellationToken {
    let cancellation = tokio_util::sync::CancellationToken::new();
    let ctrlc_cancel = cancellation.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrlc_cancel.cancel();
    });
    cancellation
}

pub async fn get_one(
    key: &str,
    dest: &Path,
    bucket: &str,
    client: &s3::Client,
    opts: &SharedOptions,
    transfer: &OptionsTransfer,
) -> MainResult {
    let output = cli::Output::new(&transfer.progress);
    let name = s3::basename(key).unwrap_or(key).to_owned();
    let update_fn = output.begin("starting", name);
    match client.get(opts, bucket, key, dest, &update_fn).await {
        Ok(path) => {
            if opts.verbose && !output.progress_enabled() {
                output.println_done(format_args!("downloaded s3://{bucket}/{key} to '{}'", path.display()));
            }
            MainResult::Success
        }
        Err(e) => {
            update_fn(cli::Update::Failed(e.to_string()));
            if !output.progress_enabled() {
                output.println_error(format_args!("failed to get s3://{bucket}/{key}: {e}"));
            }
            MainResult::ErrorSomeOperationsFailed
        }
    }
}

/// Upload every regular file directly inside `source`, keyed by file
/// name. Enumeration is deliberately non-recursive; subdirectories are
/// skipped. Fail-fast unless --continue-on-error was given.
pub async fn upload(
    source: &Path,
    bucket: &str,
    client: &s3::Client,
    opts: &SharedOptions,
    transfer: &OptionsTransfer,
) -> MainResult {
    let output = cli::Output::new(&transfer.progress);
    let mut entries = match tokio::fs::read_dir(source).await {
        Ok(entries) => entries,
        Err(e) => {
            output.println_error(format_args!("reading directory '{}': {e}", source.display()));
            return MainResult::ErrorSomeOperationsFailed;
        }
    };

    let cancellation = ctrl_c_cancellation();
    let mut error_count = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                output.println_error(format_args!("reading directory '{}': {e}", source.display()));
                error_count += 1;
                break;
            }
        };
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                output.println_error(format_args!("failed to upload {path:?}: {e}"));
                error_count += 1;
                if !transfer.continue_on_error {
                    break;
                }
                continue;
            }
        };
        if !metadata.is_file() {
            if opts.verbose {
                eprintln!("skipping '{}': not a regular file", path.display());
            }
            continue;
        }
        let file_name = entry.file_name();
        let Some(key) = file_name.to_str() else {
            output.println_error(format_args!("skipping {path:?}: file name is not unicode"));
            error_count += 1;
            if !transfer.continue_on_error {
                break;
            }
            continue;
        };

        let update_fn = output.begin("starting", key.to_owned());
        let result = tokio::select! {
            result = client.put(opts, &path, bucket, key, &update_fn) => result,
            _ = cancellation.cancelled() => {
                update_fn(cli::Update::Failed("cancelled".to_owned()));
                return MainResult::Cancelled;
            },
        };
        match result {
            Ok(()) => {
                if opts.verbose && !output.progress_enabled() {
                    output.println_done(format_args!("uploaded '{}' to s3://{bucket}/{key}", path.display()));
                }
            }
            Err(e) => {
                update_fn(cli::Update::Failed(e.to_string()));
                if !output.progress_enabled() {
                    output.println_error(format_args!("failed to upload {path:?}: {e}"));
                }
                error_count += 1;
                if !transfer.continue_on_error {
                    break;
                }
            }
        }
    }

    MainResult::from_error_count(error_count)
}

/// Fetch every object in the bucket into `dest` (the current directory
/// when dispatched from the command line), named by each key's base
/// name. Keys ending in '/' are listing artifacts with no contents of
/// their own and are skipped.
pub async fn download(
    bucket: &str,
    dest: &Path,
    client: &s3::Client,
    opts: &SharedOptions,
    transfer: &OptionsTransfer,
) -> MainResult {
    let output = cli::Output::new(&transfer.progress);
    let cancellation = ctrl_c_cancellation();
    let mut keys = client.list_keys(bucket);
    let mut error_count = 0;

    loop {
        let next = tokio::select! {
            next = keys.next() => next,
            _ = cancellation.cancelled() => {
                output.println_error(format_args!("cancelled"));
                return MainResult::Cancelled;
            },
        };
        let Some(listed) = next else { break };
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                output.println_error(format_args!("failed to list s3://{bucket}: {e}"));
                error_count += 1;
                break;
            }
        };
        if s3::basename(&listed.key).is_none() {
            if opts.verbose {
                eprintln!("skipping '{}': no base name", listed.key);
            }
            continue;
        }

        let update_fn = output.begin("starting", listed.key.clone());
        let result = tokio::select! {
            result = client.get(opts, bucket, &listed.key, dest, &update_fn) => result,
            _ = cancellation.cancelled() => {
                update_fn(cli::Update::Failed("cancelled".to_owned()));
                return MainResult::Cancelled;
            },
        };
        match result {
            Ok(path) => {
                if opts.verbose && !output.progress_enabled() {
                    output.println_done(format_args!("downloaded s3://{bucket}/{} to '{}'", listed.key, path.display()));
                }
            }
            Err(e) => {
                update_fn(cli::Update::Failed(e.to_string()));
                if !output.progress_enabled() {
                    output.println_error(format_args!("failed to download s3://{bucket}/{}: {e}", listed.key));
                }
                error_count += 1;
                if !transfer.continue_on_error {
                    break;
                }
            }
        }
    }

    MainResult::from_error_count(error_count)
}

pub async fn list(bucket: &str, client: &s3::Client, options: &OptionsList) -> MainResult {
    let mut keys = client.list_keys(bucket);
    while let Some(listed) = keys.next().await {
        match listed {
            Ok(object) => print_listed(&object, options),
            Err(e) => {
                cli::println_error(format_args!("failed to list s3://{bucket}: {e}"));
                return MainResult::ErrorSomeOperationsFailed;
            }
        }
    }
    MainResult::Success
}

fn print_listed(object: &s3::ListedObject, options: &OptionsList) {
    if options.long {
        let owner = object.owner.as_deref().unwrap_or("unknown");
        let modified = object
            .last_modified
            .as_ref()
            .and_then(|date| date.fmt(aws_sdk_s3::primitives::DateTimeFormat::DateTime).ok())
            .unwrap_or_else(|| "-".to_owned());
        println!("{owner} {modified} {:>10} {}", object.size, object.key);
    } else {
        println!("{}", object.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::Arguments;
    use clap::Parser;

    async fn test_client(server: &mockito::Server) -> s3::Client {
        s3::connect(s3::ConnectOptions {
            access_key: "test-access".to_owned(),
            secret_key: "test-secret".to_owned(),
            endpoint: server.url().parse().expect("mock server url"),
            region: Some("us-east-1".to_owned()),
        })
        .await
    }

    fn test_arguments(extra: &[&str]) -> Arguments {
        let mut argv = vec!["pho3", "-l", "k", "-p", "s", "-c", "upload", "-b", "photos", "-s", "."];
        argv.extend_from_slice(extra);
        Arguments::try_parse_from(argv).expect("valid test arguments")
    }

    #[tokio::test]
    async fn upload_stops_at_the_first_failure() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", mockito::Matcher::Regex("^/photos/.*".into()))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server).await;
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write a");
        std::fs::write(dir.path().join("b.txt"), "b").expect("write b");

        let args = test_arguments(&[]);
        let result = upload(dir.path(), "photos", &client, &args.shared, &args.transfer).await;
        assert!(matches!(result, MainResult::ErrorSomeOperationsFailed));
        put.assert_async().await;
    }

    #[tokio::test]
    async fn upload_can_continue_past_failures() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", mockito::Matcher::Regex("^/photos/.*".into()))
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let client = test_client(&server).await;
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write a");
        std::fs::write(dir.path().join("b.txt"), "b").expect("write b");

        let args = test_arguments(&["-y"]);
        let result = upload(dir.path(), "photos", &client, &args.shared, &args.transfer).await;
        assert!(matches!(result, MainResult::ErrorSomeOperationsFailed));
        put.assert_async().await;
    }

    #[tokio::test]
    async fn upload_keys_by_base_name_and_skips_subdirectories() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", mockito::Matcher::Regex(r"^/photos/a\.txt(\?.*)?$".into()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server).await;
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write a");
        std::fs::create_dir(dir.path().join("album")).expect("mkdir");
        std::fs::write(dir.path().join("album").join("nested.txt"), "n").expect("write nested");

        let args = test_arguments(&[]);
        let result = upload(dir.path(), "photos", &client, &args.shared, &args.transfer).await;
        assert!(matches!(result, MainResult::Success));
        put.assert_async().await;
    }

    async fn list_page(server: &mut mockito::Server, body: &str) -> mockito::Mock {
        server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/(\?.*)?$".into()))
            .match_query(mockito::Matcher::UrlEncoded("list-type".into(), "2".into()))
            .with_header("content-type", "application/xml")
            .with_body(body)
            .create_async()
            .await
    }

    const TWO_KEY_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Name>photos</Name>
    <KeyCount>3</KeyCount>
    <MaxKeys>1000</MaxKeys>
    <IsTruncated>false</IsTruncated>
    <Contents><Key>x</Key><Size>2</Size></Contents>
    <Contents><Key>album/</Key><Size>0</Size></Contents>
    <Contents><Key>y</Key><Size>3</Size></Contents>
</ListBucketResult>"#;

    #[tokio::test]
    async fn download_fetches_every_object_into_the_destination() {
        let mut server = mockito::Server::new_async().await;
        let listing = list_page(&mut server, TWO_KEY_PAGE).await;
        let get_x = server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/x(\?.*)?$".into()))
            .with_body("ex")
            .expect(1)
            .create_async()
            .await;
        let get_y = server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/y(\?.*)?$".into()))
            .with_body("why")
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server).await;
        let dest = tempfile::tempdir().expect("tempdir");
        let args = test_arguments(&[]);
        let result = download(
            "photos",
            dest.path(),
            &client,
            &args.shared,
            &args.transfer,
        )
        .await;
        assert!(matches!(result, MainResult::Success));
        assert_eq!(std::fs::read(dest.path().join("x")).expect("file x"), b"ex");
        assert_eq!(std::fs::read(dest.path().join("y")).expect("file y"), b"why");
        // the directory-marker key leaves nothing behind
        assert_eq!(std::fs::read_dir(dest.path()).expect("readdir").count(), 2);
        listing.assert_async().await;
        get_x.assert_async().await;
        get_y.assert_async().await;
    }

    #[tokio::test]
    async fn download_stops_at_the_first_failed_object() {
        let mut server = mockito::Server::new_async().await;
        let listing = list_page(&mut server, TWO_KEY_PAGE).await;
        let get_x = server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/x(\?.*)?$".into()))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let get_y = server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/y(\?.*)?$".into()))
            .with_body("why")
            .expect(0)
            .create_async()
            .await;

        let client = test_client(&server).await;
        let dest = tempfile::tempdir().expect("tempdir");
        let args = test_arguments(&[]);
        let result = download(
            "photos",
            dest.path(),
            &client,
            &args.shared,
            &args.transfer,
        )
        .await;
        assert!(matches!(result, MainResult::ErrorSomeOperationsFailed));
        assert!(!dest.path().join("y").exists());
        listing.assert_async().await;
        get_x.assert_async().await;
        get_y.assert_async().await;
    }

    #[tokio::test]
    async fn download_can_continue_past_failures() {
        let mut server = mockito::Server::new_async().await;
        let listing = list_page(&mut server, TWO_KEY_PAGE).await;
        let get_x = server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/x(\?.*)?$".into()))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let get_y = server
            .mock("GET", mockito::Matcher::Regex(r"^/photos/y(\?.*)?$".into()))
            .with_body("why")
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server).await;
        let dest = tempfile::tempdir().expect("tempdir");
        let args = test_arguments(&["-y"]);
        let result = download(
            "photos",
            dest.path(),
            &client,
            &args.shared,
            &args.transfer,
        )
        .await;
        assert!(matches!(result, MainResult::ErrorSomeOperationsFailed));
        assert_eq!(std::fs::read(dest.path().join("y")).expect("file y"), b"why");
        listing.assert_async().await;
        get_x.assert_async().await;
        get_y.assert_async().await;
    }

    #[tokio::test]
    async fn upload_of_missing_directory_fails_without_requests() {
        let server = mockito::Server::new_async().await;
        let client = test_client(&server).await;
        let args = test_arguments(&[]);
        let result = upload(
            Path::new("/nonexistent/pho3-test"),
            "photos",
            &client,
            &args.shared,
            &args.transfer,
        )
        .await;
        assert!(matches!(result, MainResult::ErrorSomeOperationsFailed));
    }
}
