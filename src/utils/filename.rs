use rand::Rng;

/// Random attachment name for a synthesized clip: 32 hex chars + extension.
pub fn generate_audio_filename(extension: &str) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    format!("{}.{}", hex::encode(bytes), extension)
}
