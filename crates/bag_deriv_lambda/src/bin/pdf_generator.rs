use bag_deriv_core::contract::QueueKind;
use bag_deriv_lambda::runtime::run_lambda;
use bag_deriv_lambda::telemetry::init_tracing;
use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    run_lambda(QueueKind::Pdf).await
}
