use bag_deriv_lambda::runtime::run_worker;
use bag_deriv_lambda::telemetry::init_tracing;
use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    init_tracing();
    run_worker().await
}
