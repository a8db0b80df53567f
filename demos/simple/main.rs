use feature_evaluations::{ClientConfig, Credentials, EvaluationRequest};

#[tokio::main]
pub async fn main() -> feature_evaluations::Result<()> {
    // Configure env_logger to see client logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("feature_evaluations"))
        .init();

    let endpoint = std::env::var("EVALUATION_ENDPOINT")
        .unwrap_or_else(|_| "https://evidently.us-west-2.amazonaws.com".to_owned());
    let project =
        std::env::var("EVALUATION_PROJECT").expect("EVALUATION_PROJECT env variable should contain project name");

    let mut config = ClientConfig::from_endpoint(endpoint)
        .project(project)
        .region("us-west-2");
    if let (Ok(access_key_id), Ok(secret_access_key)) = (
        std::env::var("AWS_ACCESS_KEY_ID"),
        std::env::var("AWS_SECRET_ACCESS_KEY"),
    ) {
        config = config.credentials(Credentials::new(access_key_id, secret_access_key));
    }
    let client = config.to_client()?;

    // Request evaluations up front. Fetching starts in the background.
    client.request_evaluations(EvaluationRequest::new(["a-boolean-feature"]).entity_id("test-subject"))?;

    // Waits for the fetch started above.
    match client.get_evaluations(["a-boolean-feature"]).await {
        Ok(evaluations) => {
            let enabled = evaluations["a-boolean-feature"]
                .value
                .as_bool()
                // default value
                .unwrap_or(false);
            println!("Evaluation: {:?}", enabled);
        }
        Err(err) => println!("error fetching evaluations: {:?}", err),
    }

    Ok(())
}
