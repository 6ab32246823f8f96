//! E2E test: sends a real request to the configured vision backends and
//! verifies a text answer comes back.
//!
//! Requires environment variables:
//!   GEMINI_API_KEY - for the Gemini tests
//!   OPENAI_API_KEY - for the OpenAI tests
//!
//! Run: cargo test --test provider_e2e -- --ignored

use image::{ImageFormat, Rgb, RgbImage};
use inspector_lib::ai::gemini::{self, GeminiClient};
use inspector_lib::ai::openai::{self, OpenAiClient};
use inspector_lib::ai::{AgentEvent, ProviderRequest, VisionProvider, NO_CONTENT};
use inspector_lib::session::ReferenceImage;
use std::io::Cursor;

fn get_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("Set {} env var to run this test", key))
}

/// A 32x32 red square, PNG-encoded.
fn red_square() -> ReferenceImage {
    let img = RgbImage::from_pixel(32, 32, Rgb([220, 20, 20]));
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .expect("png encode failed");
    ReferenceImage::new("red.png", "image/png", png).expect("reference")
}

async fn ask_about_color(provider: &dyn VisionProvider) -> String {
    let references = [red_square()];
    let request = ProviderRequest {
        prompt: "What single color fills the reference image? Answer with one word.",
        video: None,
        frames: &[],
        references: &references,
    };
    provider.invoke(&request).await.expect("invoke failed")
}

#[tokio::test]
#[ignore] // Only run manually with --ignored flag
async fn gemini_describes_reference_image() {
    let client = GeminiClient::new(get_env("GEMINI_API_KEY"), gemini::DEFAULT_MODEL);
    let answer = ask_about_color(&client).await;
    println!("Gemini answered: {answer}");
    assert_ne!(answer, NO_CONTENT);
    assert!(answer.to_lowercase().contains("red"));
}

#[tokio::test]
#[ignore]
async fn openai_describes_reference_image() {
    let client = OpenAiClient::new(get_env("OPENAI_API_KEY"), openai::DEFAULT_MODEL);
    let answer = ask_about_color(&client).await;
    println!("OpenAI answered: {answer}");
    assert!(answer.to_lowercase().contains("red"));
}

#[tokio::test]
#[ignore]
async fn gemini_stream_ends_with_final() {
    let client =
        GeminiClient::new(get_env("GEMINI_API_KEY"), gemini::DEFAULT_MODEL).with_streaming(true);
    let mut stream = client
        .invoke_stream(&ProviderRequest::text("Count from one to five in words."))
        .await
        .expect("stream request failed");

    let mut progress = 0;
    let mut final_text = None;
    while let Some(event) = stream.recv().await {
        match event {
            AgentEvent::Progress(status) => {
                progress += 1;
                println!("progress: {status}");
            }
            AgentEvent::Final(text) => {
                final_text = Some(text);
                break;
            }
            AgentEvent::Error(e) => panic!("stream error: {e}"),
        }
    }

    assert!(progress > 0, "expected at least one progress event");
    let text = final_text.expect("stream ended without a final output");
    assert!(text.to_lowercase().contains("five"));
}
