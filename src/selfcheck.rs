//! One-shot serialization self-check (`--test`).

use crate::codec::{PayloadCodec, UserApps, serialize};
use crate::record::parse_apps_installed;
use anyhow::{Context, Result, ensure};
use tracing::info;

/// Sample lines checked by [`run_selfcheck`].
pub const SAMPLE: &str = "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n\
                          gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424";

/// Parse, encode and decode every sample line, checking the payload
/// survives unchanged. Returns the number of lines checked.
///
/// # Errors
///
/// Returns an error if a sample line does not parse, cannot be encoded or
/// decoded, or decodes to a different payload.
pub fn run_selfcheck(codec: &dyn PayloadCodec) -> Result<usize> {
    let mut checked = 0;
    for line in SAMPLE.lines() {
        let rec = parse_apps_installed(line).with_context(|| format!("parse sample {line:?}"))?;
        let (key, packed) = serialize(&rec, codec)?;
        let unpacked = codec.decode(&packed)?;
        let original = UserApps::from(&rec);
        ensure!(
            unpacked == original,
            "{key}: decoded {unpacked:?} differs from original {original:?}"
        );
        checked += 1;
    }
    info!(codec = codec.name(), checked, "self-check passed");
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, PostcardCodec};

    #[test]
    fn postcard_passes() {
        assert_eq!(run_selfcheck(&PostcardCodec).unwrap(), 2);
    }

    struct Lossy;

    impl PayloadCodec for Lossy {
        fn name(&self) -> &str {
            "lossy"
        }

        fn encode(&self, apps: &UserApps) -> Result<Vec<u8>, CodecError> {
            PostcardCodec.encode(apps)
        }

        fn decode(&self, bytes: &[u8]) -> Result<UserApps, CodecError> {
            let mut ua = PostcardCodec.decode(bytes)?;
            ua.apps.pop();
            Ok(ua)
        }
    }

    #[test]
    fn lossy_codec_fails() {
        let err = run_selfcheck(&Lossy).unwrap_err();
        assert!(err.to_string().contains("differs"));
    }
}
