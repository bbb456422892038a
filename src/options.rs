use fusiongate_executor::ErrorMode;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "fusiongate")]
pub struct Options {
    /// Path of the config file
    #[structopt(long, default_value = "config.toml")]
    pub config: String,

    /// Path of the composite execution schema
    #[structopt(long)]
    pub schema: String,

    /// Path of the GraphQL operation document
    #[structopt(long)]
    pub query: String,

    /// Path of a JSON file holding the operation variables
    #[structopt(long)]
    pub variables: Option<String>,

    /// Name of the operation to execute
    #[structopt(long)]
    pub operation: Option<String>,

    /// Requested error mode (propagate, null or halt)
    #[structopt(long)]
    pub error_mode: Option<ErrorMode>,

    /// Client request header as `Name: value`, sent on when listed in `forward_headers`
    #[structopt(long = "header", short = "H")]
    pub headers: Vec<String>,
}
