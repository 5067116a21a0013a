use crate::model::{GenerationRequest, StreamRequest};
use unicode_normalization::UnicodeNormalization;

pub fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

fn clamp_round_f32(x: f32, lo: f32, hi: f32, dp: u32) -> f32 {
    let clamped = x.clamp(lo, hi);
    let p = 10f32.powi(dp as i32);
    (clamped * p).round() / p
}

pub fn normalize_generation(mut req: GenerationRequest) -> GenerationRequest {
    req.context = clean_text(&req.context);
    req.book_context.genre = clean_text(&req.book_context.genre);
    req.book_context.style = clean_text(&req.book_context.style);
    if let Some(plot) = req.book_context.plot_summary.take() {
        let plot = clean_text(&plot);
        req.book_context.plot_summary = (!plot.is_empty()).then_some(plot);
    }
    req.settings.temperature = clamp_round_f32(req.settings.temperature, 0.0, 2.0, 3);
    req
}

pub fn normalize_stream(mut req: StreamRequest) -> StreamRequest {
    req.prompt = clean_text(&req.prompt);
    req.book_context.genre = clean_text(&req.book_context.genre);
    req.book_context.style = clean_text(&req.book_context.style);
    req
}
