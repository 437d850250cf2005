mod arguments;
mod cli;
mod s3;
mod shared_options;
mod transfer;

use clap::Parser;

use arguments::{Arguments, MainResult};

#[tokio::main]
async fn main() -> MainResult {
    let args = match Arguments::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return MainResult::from_clap_error(&error);
        }
    };

    if let Some(message) = args.missing_argument() {
        use clap::CommandFactory;
        let _ = Arguments::command()
            .error(clap::error::ErrorKind::MissingRequiredArgument, message)
            .print();
        return MainResult::ErrorArguments;
    }

    let client = s3::connect(s3::ConnectOptions {
        access_key: args.login.clone(),
        secret_key: args.password.clone(),
        endpoint: args.endpoint.clone(),
        region: args.region.clone(),
    })
    .await;

    args.run(&client).await
}
