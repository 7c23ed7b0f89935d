//! Compiled-in default configuration document
//!
//! Adding a key here makes it visible in every deployment on the next cache
//! fill, without migrating persisted documents.

use serde_json::{json, Value};

pub fn default_document() -> Value {
    json!({
        "costs": {
            "imageGenerate": 5,
            "imageGenerateNoWatermark": 8,
            "imageEdit": 6,
            "imageEditNoWatermark": 9,
            "textRewrite": 1,
            "shortText": 1,
            // per started block of 100 characters
            "textToSpeech": 1
        },
        "models": {
            "image": ["gemini-2.5-flash-image"],
            "text": ["gemini-2.5-flash"],
            "speech": ["gemini-2.5-flash-preview-tts"]
        },
        "store": {
            "currency": "usd",
            "packages": [
                { "id": "starter", "points": 100, "price": 499 },
                { "id": "creator", "points": 300, "price": 1299 },
                { "id": "studio", "points": 1000, "price": 3499 }
            ]
        },
        "rewards": {
            "dailyPoints": 5
        },
        "maintenance": {
            "enabled": false,
            "message": {
                "en": "We are performing scheduled maintenance. Please check back soon.",
                "ru": "Идут плановые технические работы. Пожалуйста, зайдите позже."
            },
            "allowedPaths": ["/api/settings", "/api/auth/login", "/api/billing/webhook", "/health"]
        },
        "theme": {
            "primaryColor": "#6d28d9",
            "backgroundColor": "#0f0f14",
            "logoUrl": "/logo.svg"
        },
        "content": {
            "title": "Pointgate Studio",
            "tagline": "Images, voices and words, paid for in points."
        }
    })
}
