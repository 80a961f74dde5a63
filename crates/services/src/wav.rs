//! WAV-Kodierung fuer den Austausch mit den HTTP-Diensten
//!
//! Intern fliesst rohes PCM (48 kHz / 16 Bit / Stereo, little-endian).
//! Transkriptions-Dienste erwarten eine WAV-Datei, Synthese-Dienste liefern
//! eine zurueck.

use bytes::Bytes;
use std::io::Cursor;
use voxbot_core::types::audio_format;
use voxbot_core::{Result, VoxbotError};

fn pcm_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: audio_format::KANAELE,
        sample_rate: audio_format::ABTASTRATE,
        bits_per_sample: audio_format::BITS_PRO_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Verpackt rohes PCM in eine WAV-Datei
///
/// Ein ueberzaehliges Byte am Ende (halbes Sample) wird ignoriert.
pub fn pcm_zu_wav(pcm: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    let mut writer = hound::WavWriter::new(&mut cursor, pcm_spec())
        .map_err(|e| VoxbotError::intern(format!("WAV-Header: {e}")))?;
    for sample in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(|e| VoxbotError::intern(format!("WAV schreiben: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| VoxbotError::intern(format!("WAV abschliessen: {e}")))?;
    Ok(cursor.into_inner())
}

/// Dekodiert eine WAV-Datei in abspielbares PCM
///
/// Integer- und 32-Bit-Float-Samples werden angenommen, jede Abtastrate wird
/// auf 48 kHz umgerechnet und Mono auf Stereo verdoppelt.
pub fn wav_zu_pcm(wav: &[u8]) -> Result<Bytes> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))
        .map_err(|e| VoxbotError::Synthese(format!("Ungueltige WAV-Datei: {e}")))?;
    let spec = reader.spec();

    let kanaele = usize::from(spec.channels);
    if kanaele == 0 || kanaele > 2 {
        return Err(VoxbotError::Synthese(format!(
            "{kanaele} Kanaele nicht unterstuetzt"
        )));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, bits @ 1..=32) => {
            let skala = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / skala))
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()
        }
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, hound::Error>>(),
        (format, bits) => {
            return Err(VoxbotError::Synthese(format!(
                "Sample-Format {format:?}/{bits} Bit nicht unterstuetzt"
            )))
        }
    }
    .map_err(|e| VoxbotError::Synthese(format!("WAV lesen: {e}")))?;

    // Deinterleaven, pro Kanal umrechnen
    let mut spuren: Vec<Vec<f32>> = (0..kanaele)
        .map(|k| samples.iter().skip(k).step_by(kanaele).copied().collect())
        .collect();
    if spec.sample_rate != audio_format::ABTASTRATE {
        spuren = umtasten(spuren, spec.sample_rate, audio_format::ABTASTRATE)?;
    }

    let links = &spuren[0];
    let rechts = spuren.get(1).unwrap_or(links);
    let mut pcm = Vec::with_capacity(links.len() * 4);
    for (l, r) in links.iter().zip(rechts) {
        pcm.extend_from_slice(&zu_i16(*l).to_le_bytes());
        pcm.extend_from_slice(&zu_i16(*r).to_le_bytes());
    }
    Ok(Bytes::from(pcm))
}

fn zu_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Sinc-Resampling aller Spuren in einem Durchlauf
fn umtasten(spuren: Vec<Vec<f32>>, von: u32, nach: u32) -> Result<Vec<Vec<f32>>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let laenge = spuren.first().map_or(0, Vec::len);
    if laenge == 0 || von == 0 {
        return Ok(spuren);
    }

    let parameter = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        f64::from(nach) / f64::from(von),
        2.0,
        parameter,
        laenge,
        spuren.len(),
    )
    .map_err(|e| VoxbotError::Synthese(format!("Resampler {von} -> {nach} Hz: {e}")))?;

    let ausgabe = resampler
        .process(&spuren, None)
        .map_err(|e| VoxbotError::Synthese(format!("Resampling {von} -> {nach} Hz: {e}")))?;
    tracing::trace!(von, nach, eingang = laenge, ausgang = ausgabe[0].len(), "WAV umgetastet");
    Ok(ausgabe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_erzeugen(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn pcm_wird_als_48khz_stereo_verpackt() {
        let pcm: Vec<u8> = [1i16, -2, 300, -400]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let wav = pcm_zu_wav(&pcm).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 300, -400]);
    }

    #[test]
    fn halbes_sample_am_ende_wird_ignoriert() {
        let wav = pcm_zu_wav(&[1, 0, 2, 0, 7]).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn mono_wird_auf_stereo_verdoppelt() {
        let wav = wav_erzeugen(1, 48_000, &[10, -20]);
        let pcm = wav_zu_pcm(&wav).unwrap();
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![10, 10, -20, -20]);
    }

    #[test]
    fn mono_24khz_wird_auf_48khz_stereo_umgerechnet() {
        // 100 ms Sinus mit 440 Hz
        let eingang: Vec<i16> = (0..2400)
            .map(|i| {
                let t = i as f32 / 24_000.0;
                ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
            })
            .collect();
        let wav = wav_erzeugen(1, 24_000, &eingang);
        let pcm = wav_zu_pcm(&wav).unwrap();

        assert_eq!(pcm.len() % 4, 0, "ganze Stereo-Frames");
        let frames = pcm.len() / 4;
        assert!((4780..=4820).contains(&frames), "{frames} Frames statt ~4800");

        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert!(samples.chunks_exact(2).all(|f| f[0] == f[1]), "beide Kanaele gleich");
        let spitze = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!((6000..=9000).contains(&spitze), "Pegel bleibt erhalten: {spitze}");
    }

    #[test]
    fn float_wav_wird_gewandelt() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.5f32, -0.5, 1.5, 0.0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let pcm = wav_zu_pcm(&cursor.into_inner()).unwrap();
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![16384, -16384, i16::MAX, 0]);
    }

    #[test]
    fn mehr_als_zwei_kanaele_werden_abgelehnt() {
        let wav = wav_erzeugen(4, 48_000, &[1, 2, 3, 4]);
        assert!(matches!(wav_zu_pcm(&wav), Err(VoxbotError::Synthese(_))));
    }

    #[test]
    fn kein_wav_wird_abgelehnt() {
        assert!(matches!(
            wav_zu_pcm(b"kein wav"),
            Err(VoxbotError::Synthese(_))
        ));
    }
}
