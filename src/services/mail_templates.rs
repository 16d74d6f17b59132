//! HTML bodies for transactional mail. French copy matching the site.

use crate::clients::mail::MailMessage;

#[must_use]
pub fn verification_email(base_url: &str, email: &str, token: &str) -> MailMessage {
    let link = format!(
        "{base_url}/api/auth/verify-email?token={token}&email={}",
        urlencoding::encode(email)
    );

    MailMessage {
        to: email.to_string(),
        subject: "Confirmez votre adresse email".to_string(),
        html: format!(
            "<p>Bienvenue !</p>\
             <p>Cliquez sur le lien ci-dessous pour confirmer votre adresse email. \
             Ce lien est valable 24 heures.</p>\
             <p><a href=\"{link}\">Confirmer mon adresse</a></p>"
        ),
    }
}

#[must_use]
pub fn reset_email(base_url: &str, email: &str, token: &str) -> MailMessage {
    let link = format!(
        "{base_url}/reset-password?token={token}&email={}",
        urlencoding::encode(email)
    );

    MailMessage {
        to: email.to_string(),
        subject: "Réinitialisation de votre mot de passe".to_string(),
        html: format!(
            "<p>Vous avez demandé la réinitialisation de votre mot de passe.</p>\
             <p>Ce lien est valable 1 heure :</p>\
             <p><a href=\"{link}\">Réinitialiser mon mot de passe</a></p>\
             <p>Si vous n'êtes pas à l'origine de cette demande, ignorez ce message.</p>"
        ),
    }
}

#[must_use]
pub fn reset_confirmation_email(email: &str) -> MailMessage {
    MailMessage {
        to: email.to_string(),
        subject: "Votre mot de passe a été modifié".to_string(),
        html: "<p>Votre mot de passe vient d'être modifié.</p>\
               <p>Si vous n'êtes pas à l'origine de ce changement, contactez-nous \
               immédiatement.</p>"
            .to_string(),
    }
}

#[must_use]
pub fn contact_email(
    contact_address: &str,
    name: &str,
    sender_email: &str,
    message: &str,
) -> MailMessage {
    MailMessage {
        to: contact_address.to_string(),
        subject: format!("Message de {name} via le formulaire de contact"),
        html: format!(
            "<p><strong>De :</strong> {} &lt;{}&gt;</p><p>{}</p>",
            html_escape::encode_text(name),
            html_escape::encode_text(sender_email),
            html_escape::encode_text(message).replace('\n', "<br>")
        ),
    }
}

#[must_use]
pub fn newsletter_email(base_url: &str, to: &str, title: &str, slug: &str) -> MailMessage {
    let link = format!("{base_url}/posts/{slug}");

    MailMessage {
        to: to.to_string(),
        subject: format!("Nouvelle annonce : {title}"),
        html: format!(
            "<p>Une nouvelle annonce a été publiée sur le site du club :</p>\
             <p><a href=\"{link}\">{}</a></p>",
            html_escape::encode_text(title)
        ),
    }
}
