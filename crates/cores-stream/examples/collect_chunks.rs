use cores_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    cores_stream::observability::init_observability();
    let client = StreamingClient::from_env()?;

    let chunks = client
        .start_stream(
            StreamingRequest::user("List three things to do this afternoon.")
                .output_mode(OutputMode::Array)
                .schema_type(SchemaType::Tasks),
            Credential::from_env(),
        )?
        .finish()
        .await?;

    for chunk in chunks {
        println!("#{} {}: {}", chunk.chunk_index, chunk.chunk_type, chunk.data);
    }
    Ok(())
}
