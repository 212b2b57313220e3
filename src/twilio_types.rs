pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Gather")]
        Gather(GatherAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct GatherAction {
        #[xmlserde(name = b"input", ty = "attr")]
        pub input: Option<String>,
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
        #[xmlserde(name = b"speechTimeout", ty = "attr")]
        pub speech_timeout: Option<String>,
        #[xmlserde(name = b"timeout", ty = "attr")]
        pub timeout: Option<u16>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {}
}
pub use twiml::*;

mod webhook {
    use serde::Deserialize;

    /// Call status values as the gateway sends them.
    #[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
    #[serde(rename_all = "kebab-case")]
    pub enum TwilioCallStatus {
        Queued,
        Initiated,
        Ringing,
        InProgress,
        Answered,
        Completed,
        Busy,
        Failed,
        NoAnswer,
        Canceled,
    }

    /// Body of the per-turn webhook.  `SpeechResult` is absent on the first request of a call.
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct TurnPayload {
        pub call_sid: Option<String>,
        pub speech_result: Option<String>,
        pub confidence: Option<f32>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct StatusCallbackPayload {
        pub call_sid: Option<String>,
        pub call_status: Option<TwilioCallStatus>,
        pub call_duration: Option<String>,
    }
}
pub use webhook::*;

mod rest {
    use serde::Deserialize;

    /// Subset of the Call resource returned when a call is created.
    #[derive(Deserialize, Debug)]
    pub struct TwilioCallResource {
        pub sid: String,
        pub status: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct TwilioErrorResponse {
        pub code: Option<u32>,
        pub message: String,
    }
}
pub use rest::*;

impl From<TwilioCallStatus> for crate::db_types::CallStatus {
    fn from(status: TwilioCallStatus) -> Self {
        use crate::db_types::CallStatus;
        match status {
            TwilioCallStatus::Queued | TwilioCallStatus::Initiated => CallStatus::Initiated,
            TwilioCallStatus::Ringing => CallStatus::Ringing,
            TwilioCallStatus::InProgress | TwilioCallStatus::Answered => CallStatus::Answered,
            TwilioCallStatus::Completed => CallStatus::Completed,
            TwilioCallStatus::Busy
            | TwilioCallStatus::Failed
            | TwilioCallStatus::NoAnswer
            | TwilioCallStatus::Canceled => CallStatus::Failed,
        }
    }
}
