use clap::Args;

#[derive(Args, Debug)]
pub struct SharedOptions {
    /// Narrate each object as it is transferred
    #[clap(long, short = 'v')]
    pub verbose: bool,
}
