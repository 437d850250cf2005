use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_types::region::Region;
use futures::stream::Stream;
use tokio::io::AsyncWriteExt;

use crate::cli;
use crate::shared_options::SharedOptions;

mod partial_file;

use partial_file::PartialFile;

/// Documented default; override with --endpoint to target another store
pub const DEFAULT_ENDPOINT: &str = "http://localhost:9000";
const DEFAULT_REGION: &str = "us-west-2";

#[derive(Clone)]
pub struct Client {
    client: aws_sdk_s3::Client,
}

pub struct ConnectOptions {
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: http::uri::Uri,
    pub region: Option<String>,
}

pub async fn connect(options: ConnectOptions) -> Client {
    let provided_region = options.region.map(Region::new);
    let region_provider = RegionProviderChain::first_try(provided_region)
        .or_default_provider()
        .or_else(DEFAULT_REGION);
    let credentials = Credentials::new(options.access_key, options.secret_key, None, None, "command-line");
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .endpoint_url(options.endpoint.to_string())
        .credentials_provider(credentials)
        // failures surface immediately rather than after hidden retries
        .retry_config(RetryConfig::disabled())
        .load()
        .await;
    // MinIO-style endpoints route buckets by path, not virtual host
    let config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(true)
        .build();
    Client {
        client: aws_sdk_s3::Client::from_conf(config),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("S3: {}", .source)]
    S3 {
        #[from]
        source: aws_sdk_s3::Error,
    },
    #[error("object body: {}", .source)]
    Body {
        #[from]
        source: aws_sdk_s3::primitives::ByteStreamError,
    },
    #[error("accessing local file: {}", .source)]
    File {
        #[from]
        source: std::io::Error,
    },
    #[error("key '{}' has no base name", .0)]
    NoBasename(String),
}

/// One entry of a bucket listing
#[derive(Debug)]
pub struct ListedObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime>,
    pub owner: Option<String>,
}

impl From<aws_sdk_s3::types::Object> for ListedObject {
    fn from(object: aws_sdk_s3::types::Object) -> ListedObject {
        ListedObject {
            key: object.key.unwrap_or_default(),
            size: object.size.unwrap_or_default(),
            last_modified: object.last_modified,
            owner: object.owner.and_then(|owner| owner.display_name),
        }
    }
}

/// Everything after the final '/' of a key; None for "directory" keys
pub fn basename(key: &str) -> Option<&str> {
    match key.rsplit_once('/') {
        None if !key.is_empty() => Some(key),
        None => None,
        Some((_, "")) => None,
        Some((_, name)) => Some(name),
    }
}

impl Client {
    pub async fn put(
        &self,
        opts: &SharedOptions,
        path: &std::path::Path,
        bucket: &str,
        key: &str,
        progress: &cli::ProgressFn,
    ) -> Result<(), Error> {
        let stream = ByteStream::from_path(path).await?;
        let size = tokio::fs::metadata(path).await?.len();
        progress(cli::Update::Total(size as usize));
        progress(cli::Update::Stage("uploading"));
        let path_printable = path.to_string_lossy();
        if opts.verbose {
            println!("uploading '{path_printable}' [{size} bytes] to s3://{bucket}/{key}");
        }
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(stream)
            .send()
            .await
            .map_err(|e| -> aws_sdk_s3::Error { e.into() })?;
        progress(cli::Update::Transferred(size as usize));
        progress(cli::Update::Done);
        Ok(())
    }

    /// Fetch one object into `dest_dir`, named by the key's base name.
    /// The body streams through a partial file renamed into place on
    /// completion, so an interrupted download leaves no final-name file.
    pub async fn get(
        &self,
        opts: &SharedOptions,
        bucket: &str,
        key: &str,
        dest_dir: &std::path::Path,
        progress: &cli::ProgressFn,
    ) -> Result<std::path::PathBuf, Error> {
        let filename = basename(key).ok_or_else(|| Error::NoBasename(key.to_owned()))?;
        let target = dest_dir.join(filename);
        if opts.verbose {
            println!("downloading s3://{bucket}/{key} to '{}'", target.to_string_lossy());
        }
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| -> aws_sdk_s3::Error { e.into() })?;
        if let Some(total) = response.content_length() {
            progress(cli::Update::Total(total as usize));
        }
        progress(cli::Update::Stage("downloading"));
        let mut body = response.body;
        let mut partial = PartialFile::new(target).await?;
        match write_body(&mut body, &mut partial, progress).await {
            Ok(()) => {
                let path = partial.finished().await?;
                progress(cli::Update::Done);
                Ok(path)
            }
            Err(e) => {
                let _ = partial.cancelled().await;
                Err(e)
            }
        }
    }

    /// Keys of every object in the bucket, lazily, in listing order
    pub fn list_keys(&self, bucket: &str) -> impl Stream<Item = Result<ListedObject, Error>> + Unpin {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .fetch_owner(true)
            .into_paginator()
            .send();
        Box::pin(async_stream::try_stream! {
            while let Some(page) = pages.next().await {
                let page = page.map_err(aws_sdk_s3::Error::from)?;
                for object in page.contents.unwrap_or_default() {
                    yield ListedObject::from(object);
                }
            }
        })
    }
}

async fn write_body(
    body: &mut ByteStream,
    partial: &mut PartialFile,
    progress: &cli::ProgressFn,
) -> Result<(), Error> {
    while let Some(chunk) = body.try_next().await? {
        partial.writer.write_all(&chunk).await?;
        progress(cli::Update::Transferred(chunk.len()));
    }
    Ok(())
}

#[test]
fn basename_of_keys() {
    assert_eq!(basename("cat.jpg"), Some("cat.jpg"));
    assert_eq!(basename("2024/06/cat.jpg"), Some("cat.jpg"));
    assert_eq!(basename("2024/06/"), None);
    assert_eq!(basename(""), None);
}

#[cfg(test)]
async fn test_client(server: &mockito::Server) -> Client {
    connect(ConnectOptions {
        access_key: "test-access".to_owned(),
        secret_key: "test-secret".to_owned(),
        endpoint: server.url().parse().expect("mock server url"),
        region: Some("us-east-1".to_owned()),
    })
    .await
}

#[tokio::test]
async fn list_yields_keys_in_listing_order() {
    let mut server = mockito::Server::new_async().await;
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Name>photos</Name>
    <Prefix></Prefix>
    <KeyCount>3</KeyCount>
    <MaxKeys>1000</MaxKeys>
    <IsTruncated>false</IsTruncated>
    <Contents><Key>x</Key><Size>4</Size><LastModified>2024-06-01T10:00:00.000Z</LastModified></Contents>
    <Contents><Key>y</Key><Size>2</Size><LastModified>2024-06-01T10:05:00.000Z</LastModified></Contents>
    <Contents><Key>album/z</Key><Size>9</Size><LastModified>2024-06-01T10:10:00.000Z</LastModified></Contents>
</ListBucketResult>"#;
    let mock = server
        .mock("GET", mockito::Matcher::Regex(r"^/photos/(\?.*)?$".into()))
        .match_query(mockito::Matcher::UrlEncoded("list-type".into(), "2".into()))
        .with_header("content-type", "application/xml")
        .with_body(body)
        .create_async()
        .await;

    let client = test_client(&server).await;
    let keys: Vec<String> = {
        use futures::StreamExt;
        client
            .list_keys("photos")
            .map(|listed| listed.expect("listing succeeds").key)
            .collect()
            .await
    };
    assert_eq!(keys, vec!["x", "y", "album/z"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn list_follows_continuation_tokens() {
    let mut server = mockito::Server::new_async().await;
    let first_page = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Name>photos</Name>
    <KeyCount>1</KeyCount>
    <MaxKeys>1</MaxKeys>
    <IsTruncated>true</IsTruncated>
    <NextContinuationToken>token-1</NextContinuationToken>
    <Contents><Key>a.jpg</Key><Size>1</Size></Contents>
</ListBucketResult>"#;
    let second_page = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Name>photos</Name>
    <KeyCount>1</KeyCount>
    <MaxKeys>1</MaxKeys>
    <IsTruncated>false</IsTruncated>
    <Contents><Key>b.jpg</Key><Size>2</Size></Contents>
</ListBucketResult>"#;
    // Registered first so the more specific continuation-token mock,
    // which mockito checks first, can shadow it for the second request
    let first = server
        .mock("GET", mockito::Matcher::Regex(r"^/photos/(\?.*)?$".into()))
        .match_query(mockito::Matcher::UrlEncoded("list-type".into(), "2".into()))
        .with_header("content-type", "application/xml")
        .with_body(first_page)
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", mockito::Matcher::Regex(r"^/photos/(\?.*)?$".into()))
        .match_query(mockito::Matcher::UrlEncoded(
            "continuation-token".into(),
            "token-1".into(),
        ))
        .with_header("content-type", "application/xml")
        .with_body(second_page)
        .expect(1)
        .create_async()
        .await;

    let client = test_client(&server).await;
    let keys: Vec<String> = {
        use futures::StreamExt;
        client
            .list_keys("photos")
            .map(|listed| listed.expect("listing succeeds").key)
            .collect()
            .await
    };
    assert_eq!(keys, vec!["a.jpg", "b.jpg"]);
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn get_writes_object_under_destination() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", mockito::Matcher::Regex(r"^/photos/2024/cat\.jpg(\?.*)?$".into()))
        .with_body("meow")
        .create_async()
        .await;

    let client = test_client(&server).await;
    let dest = tempfile::tempdir().expect("tempdir");
    let opts = SharedOptions { verbose: false };
    let written = client
        .get(&opts, "photos", "2024/cat.jpg", dest.path(), &cli::null_progress_fn())
        .await
        .expect("download succeeds");
    assert_eq!(written, dest.path().join("cat.jpg"));
    assert_eq!(std::fs::read(&written).expect("written file"), b"meow");
    assert!(!dest.path().join("cat.jpg.pho3.partial").exists());
    mock.assert_async().await;
}

#[tokio::test]
async fn get_of_directory_marker_is_an_error() {
    let server = mockito::Server::new_async().await;
    let client = test_client(&server).await;
    let dest = tempfile::tempdir().expect("tempdir");
    let opts = SharedOptions { verbose: false };
    let result = client
        .get(&opts, "photos", "album/", dest.path(), &cli::null_progress_fn())
        .await;
    assert!(matches!(result, Err(Error::NoBasename(_))));
}

#[tokio::test]
async fn failed_get_reports_the_storage_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", mockito::Matcher::Regex(r"^/photos/missing\.jpg(\?.*)?$".into()))
        .with_status(404)
        .with_header("content-type", "application/xml")
        .with_body(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"#,
        )
        .create_async()
        .await;

    let client = test_client(&server).await;
    let dest = tempfile::tempdir().expect("tempdir");
    let opts = SharedOptions { verbose: false };
    let result = client
        .get(&opts, "photos", "missing.jpg", dest.path(), &cli::null_progress_fn())
        .await;
    assert!(matches!(result, Err(Error::S3 { .. })));
    assert!(std::fs::read_dir(dest.path()).expect("readdir").next().is_none());
    mock.assert_async().await;
}
