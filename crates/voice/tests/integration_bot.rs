//! Integration-Tests fuer den VoiceBot (Attrappen fuer Transport und Dienste)

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voxbot_core::event::{BotEvent, EventBus, EventEmpfaenger, KeinEventBus};
use voxbot_core::types::{ChannelId, SpeakerId, Sprecher};
use voxbot_core::{AntwortAnfrage, AntwortGenerator, Result, Synthesizer, Transkriptor, VoxbotError};
use voxbot_voice::{
    Annahme, Beitritt, Dienste, KanalZustand, ReconnectErgebnis, TransportEreignis,
    TransportHandle, VerwerfGrund, VoiceBot, VoiceConfig, VoiceTransport,
};

// ---------------------------------------------------------------------------
// Attrappen
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeTransport {
    verbindungen: AtomicU64,
    verbunden: Mutex<HashSet<ChannelId>>,
    abgespielt: Mutex<Vec<(ChannelId, Bytes)>>,
    wiedergabe_dauer: Mutex<Duration>,
    verbinden_fehler: AtomicBool,
    menschen: AtomicUsize,
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn verbinden(&self, kanal: ChannelId) -> Result<TransportHandle> {
        if self.verbinden_fehler.load(Ordering::SeqCst) {
            return Err(VoxbotError::Verbindung("Relay nicht erreichbar".into()));
        }
        let n = self.verbindungen.fetch_add(1, Ordering::SeqCst) + 1;
        self.verbunden.lock().insert(kanal);
        Ok(TransportHandle {
            kanal,
            verbindung: n,
        })
    }

    async fn trennen(&self, handle: &TransportHandle) -> Result<()> {
        self.verbunden.lock().remove(&handle.kanal);
        Ok(())
    }

    async fn abspielen(&self, handle: &TransportHandle, audio: Bytes) -> Result<()> {
        let dauer = *self.wiedergabe_dauer.lock();
        tokio::time::sleep(dauer).await;
        self.abgespielt.lock().push((handle.kanal, audio));
        Ok(())
    }

    async fn keepalive(&self, _handle: &TransportHandle) -> Result<()> {
        Ok(())
    }

    fn ist_verbunden(&self, kanal: ChannelId) -> bool {
        self.verbunden.lock().contains(&kanal)
    }

    fn menschliche_teilnehmer(&self, _kanal: ChannelId) -> usize {
        self.menschen.load(Ordering::SeqCst)
    }
}

struct FakeStt {
    text: Mutex<String>,
    aufrufe: Mutex<Vec<Vec<u8>>>,
}

impl FakeStt {
    fn neu(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
            aufrufe: Mutex::new(Vec::new()),
        }
    }
}

impl Transkriptor for FakeStt {
    fn transkribieren(&self, audio: &[u8]) -> Result<String> {
        self.aufrufe.lock().push(audio.to_vec());
        Ok(self.text.lock().clone())
    }
}

#[derive(Default)]
struct FakeLlm {
    anfragen: Mutex<Vec<AntwortAnfrage>>,
}

#[async_trait]
impl AntwortGenerator for FakeLlm {
    async fn generieren(&self, anfrage: &AntwortAnfrage) -> Result<String> {
        self.anfragen.lock().push(anfrage.clone());
        Ok("claro que si".into())
    }
}

#[derive(Default)]
struct FakeTts {
    fehler: AtomicBool,
}

#[async_trait]
impl Synthesizer for FakeTts {
    async fn synthetisieren(&self, text: &str) -> Result<Bytes> {
        if self.fehler.load(Ordering::SeqCst) {
            return Err(VoxbotError::Synthese("Dienst nicht erreichbar".into()));
        }
        Ok(Bytes::from(text.as_bytes().to_vec()))
    }
}

#[derive(Default)]
struct SammelBus {
    events: Mutex<Vec<BotEvent>>,
}

struct KeinEmpfang;

#[async_trait]
impl EventEmpfaenger for KeinEmpfang {
    async fn empfangen(&mut self) -> Option<BotEvent> {
        None
    }
}

impl EventBus for SammelBus {
    fn senden(&self, event: BotEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    fn abonnieren(&self) -> Box<dyn EventEmpfaenger + Send> {
        Box::new(KeinEmpfang)
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

const KANAL: ChannelId = ChannelId(100);

struct Umgebung {
    bot: VoiceBot,
    transport: Arc<FakeTransport>,
    stt: Arc<FakeStt>,
    llm: Arc<FakeLlm>,
    tts: Arc<FakeTts>,
}

fn test_config() -> VoiceConfig {
    VoiceConfig {
        ruhe_pause: Duration::from_millis(100),
        stille_schwelle: Duration::from_millis(100),
        reconnect_pause: Duration::from_millis(20),
        begruessung: None,
        ..VoiceConfig::default()
    }
}

fn umgebung(config: VoiceConfig, stt_text: &str, zufall: f64, events: Arc<dyn EventBus>) -> Umgebung {
    let transport = Arc::new(FakeTransport::default());
    let stt = Arc::new(FakeStt::neu(stt_text));
    let llm = Arc::new(FakeLlm::default());
    let tts = Arc::new(FakeTts::default());
    let bot = VoiceBot::mit_zufallsquelle(
        config,
        transport.clone(),
        Dienste {
            transkriptor: stt.clone(),
            generator: llm.clone(),
            synthesizer: tts.clone(),
        },
        events,
        Arc::new(move || zufall),
    );
    Umgebung {
        bot,
        transport,
        stt,
        llm,
        tts,
    }
}

fn sprecher(id: u64, name: &str) -> Sprecher {
    Sprecher::neu(SpeakerId::neu(id), name)
}

async fn warten_bis(mut bedingung: impl FnMut() -> bool) {
    let frist = tokio::time::Instant::now() + Duration::from_secs(3);
    while !bedingung() {
        assert!(
            tokio::time::Instant::now() < frist,
            "Bedingung nicht rechtzeitig erfuellt"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn sprechen(bot: &VoiceBot, sprecher: &Sprecher, pakete: u8) {
    for i in 0..pakete {
        bot.ingestor()
            .annehmen(KANAL, sprecher, Bytes::from(vec![sprecher.id.inner() as u8, i]));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zwei_gleichzeitige_sprecher_werden_getrennt_segmentiert() {
    let u = umgebung(test_config(), "vamos al rio", 0.99, Arc::new(KeinEventBus));
    u.bot.beitreten(KANAL).await.unwrap();

    let ana = sprecher(1, "Ana");
    let beto = sprecher(2, "Beto");
    for i in 0..10u8 {
        u.bot.ingestor().annehmen(KANAL, &ana, Bytes::from(vec![1, i]));
        u.bot.ingestor().annehmen(KANAL, &beto, Bytes::from(vec![2, i]));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    warten_bis(|| u.stt.aufrufe.lock().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let aufrufe = u.stt.aufrufe.lock().clone();
    assert_eq!(aufrufe.len(), 2, "Genau eine Aeusserung pro Sprecher");
    for audio in aufrufe {
        let tag = audio[0];
        let erwartet: Vec<u8> = (0..10u8).flat_map(|i| [tag, i]).collect();
        assert_eq!(audio, erwartet, "Audio von Sprecher {tag} vermischt oder umsortiert");
    }
    // Nicht angesprochen und Zufall verfehlt
    assert!(u.llm.anfragen.lock().is_empty());
}

#[tokio::test]
async fn angesprochener_bot_antwortet_mit_kontext() {
    let u = umgebung(test_config(), "oye golfobot que hora es", 0.99, Arc::new(KeinEventBus));
    u.bot.beitreten(KANAL).await.unwrap();

    sprechen(&u.bot, &sprecher(7, "Ana"), 6).await;
    warten_bis(|| u.transport.abgespielt.lock().len() == 1).await;

    let anfrage = u.llm.anfragen.lock()[0].clone();
    assert_eq!(anfrage.sprecher_name, "Ana");
    assert_eq!(anfrage.text, "oye golfobot que hora es");
    assert_eq!(
        anfrage.kontext.as_deref(),
        Some("Ana: oye golfobot que hora es")
    );

    let (kanal, audio) = u.transport.abgespielt.lock()[0].clone();
    assert_eq!(kanal, KANAL);
    assert_eq!(&audio[..], b"claro que si");

    warten_bis(|| u.bot.kanaele().holen(&KANAL).unwrap().zustand() == KanalZustand::Listening)
        .await;
}

#[tokio::test]
async fn zufallsantwort_ohne_ansprache() {
    let events = Arc::new(SammelBus::default());
    let u = umgebung(test_config(), "vamos al rio", 0.0, events.clone());
    u.bot.beitreten(KANAL).await.unwrap();

    sprechen(&u.bot, &sprecher(7, "Ana"), 5).await;
    warten_bis(|| u.llm.anfragen.lock().len() == 1).await;

    assert!(events.events.lock().contains(&BotEvent::AntwortAusgeloest {
        kanal_id: KANAL,
        angesprochen: false,
    }));
}

#[tokio::test]
async fn rauschen_erreicht_die_pipeline_nicht() {
    let events = Arc::new(SammelBus::default());
    let u = umgebung(test_config(), "hola", 0.0, events.clone());
    u.bot.beitreten(KANAL).await.unwrap();

    sprechen(&u.bot, &sprecher(7, "Ana"), 4).await;
    warten_bis(|| {
        events
            .events
            .lock()
            .iter()
            .any(|e| matches!(e, BotEvent::RauschenVerworfen { pakete: 4, .. }))
    })
    .await;
    assert!(u.stt.aufrufe.lock().is_empty());
    assert_eq!(u.bot.puffer().anzahl(), 0);
}

#[tokio::test]
async fn pakete_waehrend_der_wiedergabe_werden_verworfen() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    *u.transport.wiedergabe_dauer.lock() = Duration::from_millis(300);
    u.bot.beitreten(KANAL).await.unwrap();

    let bot = u.bot.clone();
    let wiedergabe = tokio::spawn(async move { bot.playback().abspielen(KANAL, "un momento").await });
    warten_bis(|| u.bot.kanaele().holen(&KANAL).unwrap().spricht()).await;

    let ana = sprecher(7, "Ana");
    assert_eq!(
        u.bot.ingestor().annehmen(KANAL, &ana, Bytes::from_static(&[1, 2])),
        Annahme::Verworfen(VerwerfGrund::Spricht)
    );
    assert_eq!(u.bot.puffer().laenge(KANAL, ana.id), 0);

    wiedergabe.await.unwrap().unwrap();
    assert_eq!(
        u.bot.kanaele().holen(&KANAL).unwrap().zustand(),
        KanalZustand::Listening
    );
    assert!(matches!(
        u.bot.ingestor().annehmen(KANAL, &ana, Bytes::from_static(&[1, 2])),
        Annahme::Angenommen { .. }
    ));
}

#[tokio::test]
async fn synthese_fehler_hebt_sprech_markierung_auf() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.tts.fehler.store(true, Ordering::SeqCst);
    u.bot.beitreten(KANAL).await.unwrap();

    let ergebnis = u.bot.playback().abspielen(KANAL, "hola").await;
    assert!(matches!(ergebnis, Err(VoxbotError::Synthese(_))));
    assert_eq!(
        u.bot.kanaele().holen(&KANAL).unwrap().zustand(),
        KanalZustand::Listening
    );
    assert!(u.transport.abgespielt.lock().is_empty());
}

#[tokio::test]
async fn gleichzeitiges_beitreten_verbindet_einmal() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    let (a, b) = tokio::join!(u.bot.beitreten(KANAL), u.bot.beitreten(KANAL));
    let ergebnisse = [a.unwrap(), b.unwrap()];
    assert!(ergebnisse.contains(&Beitritt::Verbunden));
    assert_eq!(u.transport.verbindungen.load(Ordering::SeqCst), 1);

    assert_eq!(u.bot.beitreten(KANAL).await.unwrap(), Beitritt::BereitsVerbunden);
    assert_eq!(u.transport.verbindungen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gleichzeitige_health_checks_loesen_einen_reconnect_aus() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.bot.beitreten(KANAL).await.unwrap();

    // Verbindung bricht weg
    u.transport.verbunden.lock().clear();

    let monitor = u.bot.monitor().clone();
    let (a, b) = tokio::join!(monitor.pruefen(), u.bot.monitor().pruefen());
    let ausgeloest = a.len() + b.len();
    assert!(ausgeloest >= 1);
    assert_eq!(u.transport.verbindungen.load(Ordering::SeqCst), 2);

    let sitzung = u.bot.kanaele().holen(&KANAL).unwrap();
    assert_eq!(sitzung.zustand(), KanalZustand::Listening);
    assert!(u.transport.ist_verbunden(KANAL));

    // Direkt nach dem Reconnect gelten Pakete als veraltet
    assert_eq!(
        u.bot
            .ingestor()
            .annehmen(KANAL, &sprecher(7, "Ana"), Bytes::from_static(&[1])),
        Annahme::Verworfen(VerwerfGrund::Schonfrist)
    );
}

#[tokio::test]
async fn fehlgeschlagener_reconnect_markiert_kanal_als_gestoert() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.bot.beitreten(KANAL).await.unwrap();

    u.transport.verbunden.lock().clear();
    u.transport.verbinden_fehler.store(true, Ordering::SeqCst);
    u.bot.monitor().pruefen().await;

    assert_eq!(
        u.bot.kanaele().holen(&KANAL).unwrap().zustand(),
        KanalZustand::Gestoert
    );
    assert!(!u.bot.status().ist_gesund());

    // Naechster Beitritt versucht es erneut
    u.transport.verbinden_fehler.store(false, Ordering::SeqCst);
    assert_eq!(u.bot.beitreten(KANAL).await.unwrap(), Beitritt::Wiederhergestellt);
    assert!(u.bot.status().ist_gesund());
}

#[tokio::test]
async fn fehlgeschlagener_beitritt_wird_vom_monitor_nachgeholt() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.transport.verbinden_fehler.store(true, Ordering::SeqCst);
    assert!(matches!(
        u.bot.beitreten(KANAL).await,
        Err(VoxbotError::Verbindung(_))
    ));

    let sitzung = u.bot.kanaele().holen(&KANAL).expect("Sitzung bleibt registriert");
    assert_eq!(sitzung.zustand(), KanalZustand::Gestoert);
    assert!(!u.bot.status().ist_gesund());

    u.transport.verbinden_fehler.store(false, Ordering::SeqCst);
    let ergebnisse = u.bot.monitor().pruefen().await;
    assert_eq!(ergebnisse.len(), 1);
    assert_eq!(sitzung.zustand(), KanalZustand::Listening);
    assert!(u.transport.ist_verbunden(KANAL));
    assert!(u.bot.status().ist_gesund());
}

#[tokio::test]
async fn verlassen_waehrend_beitritt_gibt_handle_frei() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.transport.verbinden_fehler.store(true, Ordering::SeqCst);
    let _ = u.bot.beitreten(KANAL).await;
    u.transport.verbinden_fehler.store(false, Ordering::SeqCst);

    // Reconnect laeuft (Pause 20 ms), Kanal wird in der Zwischenzeit verlassen
    let monitor = u.bot.monitor().clone();
    let laufend = tokio::spawn(async move { monitor.pruefen().await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(u.bot.verlassen(KANAL).await.unwrap());

    let ergebnisse = laufend.await.unwrap();
    assert_eq!(ergebnisse, vec![(KANAL, ReconnectErgebnis::Verlassen)]);
    assert!(!u.transport.ist_verbunden(KANAL), "kein verwaistes Handle");
    assert!(u.bot.kanaele().holen(&KANAL).is_none());
}

#[tokio::test]
async fn verlassen_verwirft_puffer_und_kontext() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.bot.beitreten(KANAL).await.unwrap();
    u.bot.kontext().anhaengen(KANAL, "Ana", "hola");
    sprechen(&u.bot, &sprecher(7, "Ana"), 3).await;

    assert!(u.bot.verlassen(KANAL).await.unwrap());
    assert_eq!(u.bot.puffer().anzahl(), 0);
    assert!(u.bot.kontext().eintraege(KANAL).is_empty());
    assert!(!u.transport.ist_verbunden(KANAL));
    assert!(!u.bot.verlassen(KANAL).await.unwrap());

    // Der abgebrochene Timer darf keine Pipeline mehr starten
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(u.stt.aufrufe.lock().is_empty());
}

#[tokio::test]
async fn neue_teilnehmer_werden_begruesst() {
    let config = VoiceConfig {
        begruessung: Some(voxbot_voice::BegruessungConfig {
            vorlage: "{name}, ¡sálte!".into(),
            verzoegerung: Duration::from_millis(50),
        }),
        ..test_config()
    };
    let u = umgebung(config, "hola", 0.99, Arc::new(KeinEventBus));
    u.bot.beitreten(KANAL).await.unwrap();

    u.bot.ereignis_verarbeiten(TransportEreignis::TeilnehmerBeigetreten {
        kanal: KANAL,
        sprecher: sprecher(7, "Ana"),
    });
    u.bot.ereignis_verarbeiten(TransportEreignis::TeilnehmerBeigetreten {
        kanal: KANAL,
        sprecher: Sprecher::bot(SpeakerId::neu(8), "OtroBot"),
    });

    warten_bis(|| !u.transport.abgespielt.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let abgespielt = u.transport.abgespielt.lock().clone();
    assert_eq!(abgespielt.len(), 1, "Bots werden nicht begruesst");
    assert_eq!(&abgespielt[0].1[..], "Ana, ¡sálte!".as_bytes());
}

#[tokio::test]
async fn status_zeigt_kanaele_und_puffer() {
    let u = umgebung(test_config(), "hola", 0.99, Arc::new(KeinEventBus));
    u.transport.menschen.store(3, Ordering::SeqCst);
    u.bot.beitreten(KANAL).await.unwrap();
    sprechen(&u.bot, &sprecher(7, "Ana"), 2).await;

    let status = u.bot.status();
    assert!(status.ist_gesund());
    assert_eq!(status.kanaele.len(), 1);
    let kanal = &status.kanaele[0];
    assert_eq!(kanal.kanal_id, KANAL.inner());
    assert_eq!(kanal.zustand, KanalZustand::Listening);
    assert_eq!(kanal.sprecher_puffer, 1);
    assert_eq!(kanal.gepufferte_pakete, 2);
    assert_eq!(kanal.teilnehmer, 3);
    assert_eq!(status.pakete.angenommen, 2);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["kanaele"][0]["zustand"], "Listening");
}
