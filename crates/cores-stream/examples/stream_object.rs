use cores_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    cores_stream::observability::init_observability();
    let client = StreamingClient::from_env()?;
    let credential = Credential::from_env();

    let request = StreamingRequest::user("Give me an analysis of this week's sales.")
        .output_mode(OutputMode::Object)
        .schema_type(SchemaType::Analysis);

    let mut handler = callbacks(
        |chunk: Chunk| println!("chunk #{} [{}]: {}", chunk.chunk_index, chunk.chunk_type, chunk.data),
        || println!("streaming completed"),
        |error: StreamError| eprintln!("streaming failed: {error}"),
    );
    let summary = client
        .stream_object(&request, credential.as_ref(), &mut handler)
        .await?;
    println!("{} chunk(s), {} malformed", summary.chunks, summary.malformed);
    Ok(())
}
