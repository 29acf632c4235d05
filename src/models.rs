//! Wire types for the structured output of `ffprobe` and ffmpeg's `loudnorm`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FileError;

/// `ffprobe -print_format json -show_format -show_streams` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeStream {
    pub index: Option<u32>,
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    pub codec_type: Option<String>,
    pub sample_fmt: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub bits_per_sample: Option<u32>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeFormat {
    pub filename: Option<String>,
    pub nb_streams: Option<u32>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    pub probe_score: Option<u32>,
    pub tags: BTreeMap<String, String>,
}

impl ProbeOutput {
    pub fn parse(json: &str) -> Result<Self, FileError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sample rate of the first audio stream, in Hz.
    pub fn audio_sample_rate(&self) -> Result<u32, FileError> {
        let raw = self
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
            .and_then(|s| s.sample_rate.as_deref())
            .ok_or(FileError::NoAudioStream)?;
        match raw.trim().parse::<u32>() {
            Ok(rate) if rate > 0 => Ok(rate),
            _ => Err(FileError::InvalidSampleRate(raw.to_string())),
        }
    }
}

/// The JSON block printed by `loudnorm=print_format=json`. ffmpeg emits every
/// value as a string; the `output_*` fields are only meaningful for a
/// normalising pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnormOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input_i: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input_tp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input_lra: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input_thresh: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output_i: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output_tp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output_lra: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output_thresh: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub normalization_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_offset: String,
}

impl LoudnormOutput {
    /// Parses an extracted block. Empty text means the tool never printed one.
    pub fn from_block(block: &str) -> Result<Self, FileError> {
        if block.trim().is_empty() {
            return Err(FileError::NoStructuredBlock);
        }
        Ok(serde_json::from_str(block)?)
    }

    /// Measured integrated loudness, exactly as the tool reported it.
    pub fn integrated_input(&self) -> Result<&str, FileError> {
        match self.input_i.trim() {
            "" => Err(FileError::MissingField("input_i")),
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: &str = r#"{
    "streams": [
        {
            "index": 0,
            "codec_name": "mjpeg",
            "codec_type": "video",
            "width": 500,
            "height": 500
        },
        {
            "index": 1,
            "codec_name": "mp3",
            "codec_long_name": "MP3 (MPEG audio layer 3)",
            "codec_type": "audio",
            "sample_fmt": "fltp",
            "sample_rate": "44100",
            "channels": 2,
            "channel_layout": "stereo",
            "bits_per_sample": 0,
            "duration": "212.088163",
            "bit_rate": "320000",
            "disposition": { "default": 1 }
        }
    ],
    "format": {
        "filename": "song.mp3",
        "nb_streams": 2,
        "format_name": "mp3",
        "duration": "212.088163",
        "size": "8495812",
        "bit_rate": "320459",
        "probe_score": 51,
        "tags": { "title": "Song" }
    }
}"#;

    const LOUDNORM: &str = r#"{
	"input_i" : "-14.25",
	"input_tp" : "-0.61",
	"input_lra" : "6.40",
	"input_thresh" : "-24.53",
	"output_i" : "-23.57",
	"output_tp" : "-9.68",
	"output_lra" : "5.00",
	"output_thresh" : "-33.86",
	"normalization_type" : "dynamic",
	"target_offset" : "-0.43"
}
"#;

    #[test]
    fn probe_picks_first_audio_stream() {
        let probe = ProbeOutput::parse(PROBE).unwrap();
        assert_eq!(probe.streams.len(), 2);
        assert_eq!(probe.audio_sample_rate().unwrap(), 44100);
        let format = probe.format.unwrap();
        assert_eq!(format.nb_streams, Some(2));
        assert_eq!(format.tags.get("title").map(String::as_str), Some("Song"));
    }

    #[test]
    fn probe_without_audio_is_an_error() {
        let probe =
            ProbeOutput::parse(r#"{"streams":[{"codec_type":"video"}],"format":{}}"#).unwrap();
        assert!(matches!(
            probe.audio_sample_rate(),
            Err(FileError::NoAudioStream)
        ));

        let probe = ProbeOutput::parse(r#"{"streams":[{"codec_type":"audio","sample_rate":"abc"}]}"#)
            .unwrap();
        assert!(matches!(
            probe.audio_sample_rate(),
            Err(FileError::InvalidSampleRate(raw)) if raw == "abc"
        ));
    }

    #[test]
    fn loudnorm_block_parses_all_fields() {
        let out = LoudnormOutput::from_block(LOUDNORM).unwrap();
        assert_eq!(out.integrated_input().unwrap(), "-14.25");
        assert_eq!(out.input_tp, "-0.61");
        assert_eq!(out.output_thresh, "-33.86");
        assert_eq!(out.normalization_type, "dynamic");
        assert_eq!(out.target_offset, "-0.43");
    }

    #[test]
    fn analysis_only_block_omits_empty_fields_when_serialized() {
        let out = LoudnormOutput::from_block("{\n\"input_i\" : \"-20.00\"\n}\n").unwrap();
        assert!(out.output_i.is_empty());
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(json, r#"{"input_i":"-20.00"}"#);
    }

    #[test]
    fn empty_block_is_reported_distinctly() {
        assert!(matches!(
            LoudnormOutput::from_block(""),
            Err(FileError::NoStructuredBlock)
        ));
        assert!(matches!(
            LoudnormOutput::from_block("{\n\"input_i\" : "),
            Err(FileError::Json(_))
        ));
        let out = LoudnormOutput::from_block("{\n}\n").unwrap();
        assert!(matches!(
            out.integrated_input(),
            Err(FileError::MissingField("input_i"))
        ));
    }
}
