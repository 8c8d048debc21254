use trending_etl::io::compression::{auto_decompress, detect_codec, strip_codec_extension};

#[test]
fn plain_objects_pass_through() -> anyhow::Result<()> {
    let data = b"video_id,views\na,1\n";
    assert!(detect_codec("region=ca/CAvideos.csv", data).is_none());
    assert_eq!(auto_decompress("region=ca/CAvideos.csv", data)?.as_ref(), data);
    assert_eq!(strip_codec_extension("region=ca/CAvideos.csv"), "region=ca/CAvideos.csv");
    Ok(())
}

#[cfg(feature = "compression-gzip")]
mod gzip {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)?;
        Ok(enc.finish()?)
    }

    #[test]
    fn detects_by_extension_or_magic_bytes() -> anyhow::Result<()> {
        let body = gzip(b"a,b\n1,2\n")?;
        assert_eq!(detect_codec("x.csv.GZ", b"").map(|c| c.name()), Some("gzip"));
        assert_eq!(detect_codec("x.csv", &body).map(|c| c.name()), Some("gzip"));
        Ok(())
    }

    #[test]
    fn decompresses_whole_objects() -> anyhow::Result<()> {
        let raw = b"video_id,views\na,1\nb,2\n";
        let body = gzip(raw)?;
        assert_eq!(auto_decompress("USvideos.csv.gz", &body)?.as_ref(), raw);
        // Unlabelled but gzipped.
        assert_eq!(auto_decompress("USvideos.csv", &body)?.as_ref(), raw);
        Ok(())
    }

    #[test]
    fn concatenated_members_are_read_in_full() -> anyhow::Result<()> {
        let mut body = gzip(b"first\n")?;
        body.extend(gzip(b"second\n")?);
        assert_eq!(auto_decompress("a.gz", &body)?.as_ref(), b"first\nsecond\n");
        Ok(())
    }

    #[test]
    fn corrupt_payloads_are_errors() {
        assert!(auto_decompress("a.csv.gz", b"not gzip").is_err());
    }

    #[test]
    fn strips_the_codec_extension() {
        assert_eq!(strip_codec_extension("region=ca/a.csv.gz"), "region=ca/a.csv");
        assert_eq!(strip_codec_extension("a.json.gzip"), "a.json");
    }
}
