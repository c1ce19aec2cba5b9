//! Encoder command builder
//!
//! Turns an [`EncoderInvocation`] into ffmpeg arguments. The `-t` limit is the
//! primary termination mechanism: the encoder stops itself once the remaining
//! duration has been sent.

use tracing::debug;

use crate::config::EncoderConfig;

/// Everything the encoder needs for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub input_source: String,
    pub output_url: String,
    /// Self-termination limit passed to the encoder
    pub duration_seconds: u64,
    pub loop_input: bool,
}

/// Builds ffmpeg arguments for a stream copy to an RTMP ingest
#[derive(Debug, Clone)]
pub struct EncoderCommandBuilder {
    extra_output_args: Vec<String>,
}

impl EncoderCommandBuilder {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            extra_output_args: config.extra_output_args.clone(),
        }
    }

    pub fn build_args(&self, invocation: &EncoderInvocation) -> Vec<String> {
        debug!(
            "Building encoder command: input='{}', duration={}s, loop={}",
            invocation.input_source, invocation.duration_seconds, invocation.loop_input
        );

        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
        ];

        self.add_input_args(&mut args, invocation);
        self.add_output_args(&mut args, invocation);

        args
    }

    fn add_input_args(&self, args: &mut Vec<String>, invocation: &EncoderInvocation) {
        // Read input at native frame rate
        args.push("-re".to_string());

        if invocation.loop_input {
            args.extend(["-stream_loop".to_string(), "-1".to_string()]);
        }

        args.extend(["-i".to_string(), invocation.input_source.clone()]);
    }

    fn add_output_args(&self, args: &mut Vec<String>, invocation: &EncoderInvocation) {
        args.extend([
            "-t".to_string(),
            invocation.duration_seconds.to_string(),
            "-c".to_string(),
            "copy".to_string(),
        ]);

        args.extend(self.extra_output_args.iter().cloned());

        args.extend([
            "-f".to_string(),
            "flv".to_string(),
            invocation.output_url.clone(),
        ]);
    }
}

/// Join an ingest base URL and a stream key
pub fn ingest_url(base: &str, stream_key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), stream_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(loop_input: bool) -> EncoderInvocation {
        EncoderInvocation {
            input_source: "/videos/show.mp4".to_string(),
            output_url: "rtmp://ingest/live2/abcd".to_string(),
            duration_seconds: 300,
            loop_input,
        }
    }

    fn position(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|a| a == flag)
    }

    #[test]
    fn test_duration_limit_is_passed() {
        let builder = EncoderCommandBuilder::new(&EncoderConfig::default());
        let args = builder.build_args(&invocation(false));

        let t = position(&args, "-t").unwrap();
        assert_eq!(args[t + 1], "300");
        assert!(position(&args, "-stream_loop").is_none());
        assert_eq!(args.last().unwrap(), "rtmp://ingest/live2/abcd");
    }

    #[test]
    fn test_loop_precedes_input() {
        let builder = EncoderCommandBuilder::new(&EncoderConfig::default());
        let args = builder.build_args(&invocation(true));

        let lp = position(&args, "-stream_loop").unwrap();
        let input = position(&args, "-i").unwrap();
        assert!(lp < input);
        assert_eq!(args[lp + 1], "-1");
    }

    #[test]
    fn test_extra_output_args_before_url() {
        let config = EncoderConfig {
            extra_output_args: vec!["-flvflags".to_string(), "no_duration_filesize".to_string()],
            ..EncoderConfig::default()
        };
        let args = EncoderCommandBuilder::new(&config).build_args(&invocation(false));

        let extra = position(&args, "-flvflags").unwrap();
        assert!(extra < position(&args, "-f").unwrap());
    }

    #[test]
    fn test_ingest_url_join() {
        assert_eq!(ingest_url("rtmp://a/live2/", "key"), "rtmp://a/live2/key");
        assert_eq!(ingest_url("rtmp://a/live2", "key"), "rtmp://a/live2/key");
    }
}
