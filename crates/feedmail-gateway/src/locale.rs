//! User-facing texts for the session protocol and verification emails.
//!
//! A session picks its locale from the tag in the initialization request.
//! Unknown tags fall back to English.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    English,
    Bengali,
}

impl Locale {
    /// Resolve a BCP-47-ish tag such as `bn`, `bn-BD` or `en_US`.
    pub fn from_tag(tag: &str) -> Self {
        let primary = tag.trim().split(['-', '_']).next().unwrap_or_default();
        if primary.eq_ignore_ascii_case("bn") {
            Locale::Bengali
        } else {
            Locale::English
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    /// Takes `{{Data}}`: the base64 nonce.
    ChallengeMessage,
    Welcome,
    InvalidSignature,
    MalformedSignature,
    InvalidEmail,
    AccountWithSameEmail,
    AccountWithSameAddress,
    AlreadyVerified,
    InvalidVerificationToken,
    InvalidFeedUrl,
    UnknownRequest,
    WhileDecoding,
    Internal,
    VerificationSubject,
    /// Takes `{{BaseURL}}` and `{{Code}}`.
    VerificationEmail,
}

fn english(key: MessageKey) -> &'static str {
    match key {
        MessageKey::ChallengeMessage => {
            "Sign this message to prove you own this address and log in to Feedmail.\n\nNonce: {{Data}}"
        }
        MessageKey::Welcome => "Welcome to Feedmail!",
        MessageKey::InvalidSignature => "The signature does not match the address.",
        MessageKey::MalformedSignature => "The signature could not be read.",
        MessageKey::InvalidEmail => "That email address is not valid.",
        MessageKey::AccountWithSameEmail => "An account with this email address already exists.",
        MessageKey::AccountWithSameAddress => "An account for this address already exists.",
        MessageKey::AlreadyVerified => "This email address is already verified.",
        MessageKey::InvalidVerificationToken => "The verification code is not valid.",
        MessageKey::InvalidFeedUrl => "Feed URLs must start with http:// or https://.",
        MessageKey::UnknownRequest => "Unknown request.",
        MessageKey::WhileDecoding => "The message could not be decoded.",
        MessageKey::Internal => "Something went wrong on our side. Please try again later.",
        MessageKey::VerificationSubject => "Verify your email address",
        MessageKey::VerificationEmail => {
            "Welcome to Feedmail!\n\n\
             Open the link below to verify your email address:\n\
             {{BaseURL}}/verify?code={{Code}}\n\n\
             Or enter this code in the app:\n\
             {{Code}}\n"
        }
    }
}

fn bengali(key: MessageKey) -> &'static str {
    match key {
        MessageKey::ChallengeMessage => {
            "এই ঠিকানাটি আপনার তা প্রমাণ করতে এবং Feedmail-এ লগ ইন করতে এই বার্তায় স্বাক্ষর করুন।\n\nনন্স: {{Data}}"
        }
        MessageKey::Welcome => "Feedmail-এ স্বাগতম!",
        MessageKey::InvalidSignature => "স্বাক্ষরটি ঠিকানার সাথে মেলে না।",
        MessageKey::MalformedSignature => "স্বাক্ষরটি পড়া যায়নি।",
        MessageKey::InvalidEmail => "ইমেল ঠিকানাটি সঠিক নয়।",
        MessageKey::AccountWithSameEmail => "এই ইমেল ঠিকানা দিয়ে ইতিমধ্যে একটি অ্যাকাউন্ট আছে।",
        MessageKey::AccountWithSameAddress => "এই ঠিকানার জন্য ইতিমধ্যে একটি অ্যাকাউন্ট আছে।",
        MessageKey::AlreadyVerified => "এই ইমেল ঠিকানাটি ইতিমধ্যে যাচাই করা হয়েছে।",
        MessageKey::InvalidVerificationToken => "যাচাইকরণ কোডটি সঠিক নয়।",
        MessageKey::InvalidFeedUrl => "ফিড URL অবশ্যই http:// অথবা https:// দিয়ে শুরু হতে হবে।",
        MessageKey::UnknownRequest => "অজানা অনুরোধ।",
        MessageKey::WhileDecoding => "বার্তাটি ডিকোড করা যায়নি।",
        MessageKey::Internal => "আমাদের দিকে একটি সমস্যা হয়েছে। অনুগ্রহ করে পরে আবার চেষ্টা করুন।",
        MessageKey::VerificationSubject => "আপনার ইমেল ঠিকানা যাচাই করুন",
        MessageKey::VerificationEmail => {
            "Feedmail-এ স্বাগতম!\n\n\
             আপনার ইমেল ঠিকানা যাচাই করতে নিচের লিংকটি খুলুন:\n\
             {{BaseURL}}/verify?code={{Code}}\n\n\
             অথবা অ্যাপে এই কোডটি লিখুন:\n\
             {{Code}}\n"
        }
    }
}

/// Per-session text lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct Localizer {
    locale: Locale,
}

impl Localizer {
    pub fn new(tag: &str) -> Self {
        Self {
            locale: Locale::from_tag(tag),
        }
    }

    /// Raw template for `key`, placeholders included.
    pub fn text(&self, key: MessageKey) -> &'static str {
        match self.locale {
            Locale::English => english(key),
            Locale::Bengali => bengali(key),
        }
    }

    /// Template for `key` with each `{{Name}}` replaced by its value.
    pub fn render(&self, key: MessageKey, vars: &[(&str, &str)]) -> String {
        let mut out = self.text(key).to_string();
        for (name, value) in vars {
            out = out.replace(&format!("{{{{{name}}}}}"), value);
        }
        out
    }

    /// The message a client signs to log in.
    pub fn challenge(&self, nonce_b64: &str) -> String {
        self.render(MessageKey::ChallengeMessage, &[("Data", nonce_b64)])
    }

    /// (subject, body) of the verification email.
    pub fn verification_email(&self, base_url: &str, code: &str) -> (String, String) {
        let base_url = base_url.trim_end_matches('/');
        (
            self.text(MessageKey::VerificationSubject).to_string(),
            self.render(
                MessageKey::VerificationEmail,
                &[("BaseURL", base_url), ("Code", code)],
            ),
        )
    }
}
