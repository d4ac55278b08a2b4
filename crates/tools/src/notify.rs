//! Staff and customer notification texts
//!
//! Every cross-notification the engine sends is composed here, in the
//! voice the sales team expects on WhatsApp. Pure functions over the
//! domain types; the callers decide the recipient and enqueue the send.

use chrono::Weekday;

use sales_agent_config::{BusinessHours, CompanyInfo, DevelopmentConfig};
use sales_agent_core::credit::credit_range;
use sales_agent_core::dates::{format_date_es, format_time_12h};
use sales_agent_core::lead::{FunnelStage, Lead, LeadCategory};
use sales_agent_core::phone::last_ten;
use sales_agent_core::text::format_money;
use sales_agent_core::{Appointment, StaffMember};

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━";

/// Temperature tag shown next to the score in staff messages.
fn format_hour_12h(hour: u32) -> String {
    if hour > 12 {
        format!("{}:00 PM", hour - 12)
    } else if hour == 12 {
        "12:00 PM".to_string()
    } else {
        format!("{hour}:00 AM")
    }
}

fn temperature(category: LeadCategory) -> &'static str {
    match category {
        LeadCategory::Hot => "HOT 🔥",
        LeadCategory::Warm => "WARM ⚠️",
        LeadCategory::Cold => "COLD ❄️",
        LeadCategory::Client => "CLIENTE ✅",
    }
}

/// Name to show staff: the real name, or the phone tail when the lead
/// never gave one.
pub fn lead_display_name(lead: &Lead) -> String {
    if lead.has_real_name() {
        lead.name.clone().unwrap_or_default()
    } else {
        let digits = last_ten(&lead.phone);
        let tail = &digits[digits.len().saturating_sub(4)..];
        format!("Cliente {tail}")
    }
}

/// New-appointment alert for the assigned seller, with the meeting
/// point and GPS link when the development is in the catalog.
pub fn new_appointment_for_seller(
    appt: &Appointment,
    lead: &Lead,
    development: Option<&DevelopmentConfig>,
) -> String {
    let mut msg = format!(
        "👋👋👋 *¡NUEVA CITA!* 👋👋👋\n{DIVIDER}\n\n\
         🏠 *{}*\n📅 *{}* a las *{}*\n\n{DIVIDER}\n\n\
         👤 *Cliente:* {}\n📱 *Tel:* {}\n📊 *Score:* {}/100 {}\n💳 *Crédito:* {}",
        appt.property,
        format_date_es(appt.date),
        format_time_12h(appt.time),
        lead_display_name(lead),
        last_ten(&lead.phone),
        lead.score,
        temperature(lead.category),
        if lead.needs_credit { "⚠️ SÍ NECESITA" } else { "No especificado" },
    );

    if let Some(dev) = development {
        msg.push_str(&format!("\n\n{DIVIDER}\n\n📍 {}", dev.description));
        if let Some(url) = &dev.maps_url {
            msg.push_str(&format!("\n🗺️ {url}"));
        }
    }

    msg.push_str(&format!("\n\n{DIVIDER}\n⚠️ *PREPÁRATE PARA RECIBIRLO* ⚠️"));
    msg
}

/// Confirmation the customer receives right after booking.
pub fn appointment_confirmation_for_lead(
    lead: &Lead,
    appt: &Appointment,
    development: Option<&DevelopmentConfig>,
    seller: Option<&StaffMember>,
) -> String {
    let mut msg = format!(
        "🎉 *¡{}, tu cita está confirmada!*\n\n📅 *{}*\n🕐 *{}*\n📍 *{}*",
        lead.first_name(),
        format_date_es(appt.date),
        format_time_12h(appt.time),
        appt.property,
    );

    if let Some(dev) = development {
        if let Some(url) = &dev.maps_url {
            msg.push_str(&format!("\n\n{DIVIDER}\n\n📍 *Ubicación GPS:*\n{url}"));
        }
    }

    if let Some(seller) = seller {
        msg.push_str(&format!(
            "\n\n{DIVIDER}\n\n👤 *Te atiende:* {}\n📱 *Contacto:* {}",
            seller.name,
            last_ten(&seller.phone),
        ));
    }

    msg.push_str("\n\n¡Te esperamos! 🏠✨");
    msg
}

/// Handoff alert for the mortgage advisor with the full financial
/// picture gathered during the credit dialogue.
pub fn credit_handoff_for_advisor(lead: &Lead) -> String {
    let income = lead
        .monthly_income
        .map(|i| format!("{}/mes", format_money(i)))
        .unwrap_or_else(|| "No proporcionado".to_string());
    let down_payment = lead
        .down_payment
        .map(format_money)
        .unwrap_or_else(|| "No proporcionado".to_string());
    let capacity = lead
        .monthly_income
        .map(|i| format_money(credit_range(i).1))
        .unwrap_or_else(|| "Por calcular".to_string());

    format!(
        "🔥 *¡NUEVO LEAD HIPOTECARIO!* 🔥\n{DIVIDER}\n\n\
         👤 *{}*\n📱 {}\n\n\
         💰 *Datos financieros:*\n├ Ingreso: {}\n├ Enganche: {}\n└ Capacidad estimada: {}\n\n\
         🏦 Banco preferido: {}\n📞 Prefiere: {}\n🏠 Interés: {}\n\n\
         ⏰ ¡Contactar pronto!",
        lead_display_name(lead),
        last_ten(&lead.phone),
        income,
        down_payment,
        capacity,
        lead.preferred_bank.as_deref().unwrap_or("Por definir"),
        lead.contact_modality.map(|m| m.as_str()).unwrap_or("Por definir"),
        lead.property_interest.as_deref().unwrap_or("Por definir"),
    )
}

/// Advisor alert for the credit-advisory visit created alongside a
/// sales visit when the lead needs financing.
pub fn credit_visit_for_advisor(
    appt: &Appointment,
    lead: &Lead,
    seller_name: Option<&str>,
) -> String {
    format!(
        "🔥🔥🔥 *LEAD NECESITA CRÉDITO* 🔥🔥🔥\n{DIVIDER}\n\n\
         🏠 *{}*\n📅 *Visita:* {} a las {}\n\n{DIVIDER}\n\n\
         👤 *Cliente:* {}\n📱 *Tel:* {}\n📊 *Score:* {}/100 {}\n👤 *Vendedor:* {}\n\n\
         {DIVIDER}\n💳 *CONTACTAR DESPUÉS DE VISITA*\n{DIVIDER}",
        appt.property,
        format_date_es(appt.date),
        format_time_12h(appt.time),
        lead_display_name(lead),
        last_ten(&lead.phone),
        lead.score,
        temperature(lead.category),
        seller_name.unwrap_or("Por asignar"),
    )
}

/// Tells the customer who their mortgage advisor is.
pub fn advisor_contact_for_lead(lead: &Lead, advisor: &StaffMember) -> String {
    let contact_line = lead
        .contact_modality
        .map(|m| m.describe_es())
        .unwrap_or("Te contactará muy pronto");

    format!(
        "✅ *¡Listo {}!*\n\nTu asesor hipotecario es:\n\n👤 *{}*\n📱 {}\n\n{} 📞\n\n\
         ¡Mucho éxito con tu crédito! 🏠",
        lead.first_name(),
        advisor.name,
        last_ten(&advisor.phone),
        contact_line,
    )
}

/// Alert for the seller when a client asks for a person.
pub fn human_handoff_for_staff(lead: &Lead) -> String {
    format!(
        "🙋 *CLIENTE PIDE ATENCIÓN PERSONAL*\n\n👤 {}\n📱 {}\n🌡️ {}\n\n\
         Pidió hablar con una persona. Contáctalo pronto 🙏",
        lead_display_name(lead),
        last_ten(&lead.phone),
        temperature(lead.category),
    )
}

/// Funnel-move notice for the assigned staff member.
pub fn stage_change_for_staff(lead: &Lead, from: FunnelStage, to: FunnelStage) -> String {
    format!(
        "📊 *LEAD ACTUALIZADO*\n\n👤 {}\n📱 {}\n\n{} ahora está en *{}* (antes {})\n🌡️ {}",
        lead_display_name(lead),
        last_ten(&lead.phone),
        lead.first_name(),
        to.label_es(),
        from.label_es(),
        temperature(lead.category),
    )
}

/// Tells the assigned seller how their lead's mortgage went.
pub fn credit_result_for_seller(lead: &Lead, bank: &str, approved: bool) -> String {
    if approved {
        format!(
            "🎉 *CRÉDITO APROBADO*\n\n👤 {}\n📱 {}\n🏦 {}\n\n¡A cerrar la venta! 💪",
            lead_display_name(lead),
            last_ten(&lead.phone),
            bank,
        )
    } else {
        format!(
            "⚠️ *CRÉDITO RECHAZADO*\n\n👤 {}\n📱 {}\n🏦 {}\n\n\
             Habla con el cliente para ver opciones 🙏",
            lead_display_name(lead),
            last_ten(&lead.phone),
            bank,
        )
    }
}

/// Notice for the staff member who just received a lead by manual
/// reassignment.
pub fn reassignment_for_staff(lead: &Lead, mover_name: &str) -> String {
    format!(
        "📋 *LEAD REASIGNADO A TI*\n\n👤 {}\n📱 {}\n📊 Etapa: {}\n🌡️ {}\n\n\
         Te lo asignó {}. ¡Dale seguimiento! 💪",
        lead_display_name(lead),
        last_ten(&lead.phone),
        lead.status.label_es(),
        temperature(lead.category),
        mover_name,
    )
}

/// Referral alert for the staff member who owns the referring lead.
pub fn referral_for_staff(
    referred_name: &str,
    referred_phone: &str,
    referrer_name: &str,
) -> String {
    format!(
        "🆕 *NUEVO LEAD REFERIDO*\n\n👤 *{}*\n📱 {}\n\n📣 Referido por: {}\n\n\
         ¡Contacta pronto, los referidos tienen alta conversión!",
        referred_name,
        last_ten(referred_phone),
        referrer_name,
    )
}

/// Cancellation notice for the seller who was going to host the visit.
pub fn cancellation_for_seller(appt: &Appointment) -> String {
    format!(
        "🚫 *CITA CANCELADA*\n\nCliente: {}\nFecha: {} {}",
        appt.lead_name,
        format_date_es(appt.date),
        format_time_12h(appt.time),
    )
}

/// Cancellation notice for the customer, sent when staff confirm it.
/// Date and time arrive pre-formatted since the appointment row may be
/// gone by the time the confirmation lands.
pub fn cancellation_for_lead(lead_first_name: &str, date_es: &str, time_12h: &str) -> String {
    format!(
        "Hola {}, tu cita del {} a las {} fue cancelada. \
         Cuando quieras reagendar aquí estoy 😊",
        lead_first_name,
        date_es,
        time_12h,
    )
}

/// Pushback when the requested hour falls outside visiting hours.
pub fn outside_hours_pushback(
    first_name: &str,
    requested_hour: u32,
    weekday: Weekday,
    hours: &BusinessHours,
) -> String {
    let day_note = match weekday {
        Weekday::Sat => " los sábados",
        Weekday::Sun => " los domingos",
        _ => "",
    };

    let Some(close) = hours.closing_hour(weekday) else {
        let sat_close = format_hour_12h(hours.saturday_close);
        return format!(
            "⚠️ {}, los domingos descansamos.\n\n\
             📅 *Horario disponible:* lunes a viernes de {}:00 AM a {}, \
             sábados hasta {}\n\n¿Qué día te gustaría visitarnos? 😊",
            first_name,
            hours.open,
            format_hour_12h(hours.close),
            sat_close,
        );
    };

    format!(
        "⚠️ {}, las *{}:00* está fuera de nuestro horario de atención{}.\n\n\
         📅 *Horario disponible{}:* {}:00 AM a {}\n\n\
         ¿A qué hora dentro de este horario te gustaría visitarnos? 😊",
        first_name,
        requested_hour,
        day_note,
        day_note,
        hours.open,
        format_hour_12h(close),
    )
}

/// First-appointment welcome, sent once per lead.
pub fn welcome_for_lead(
    lead: &Lead,
    development: Option<&DevelopmentConfig>,
    company: &CompanyInfo,
) -> String {
    let mut msg = format!(
        "¡{}, qué gusto tenerte con nosotros! 🏠\n\n\
         Soy {}, de {}. Ya quedó agendada tu visita; \
         cualquier duda antes de tu cita, aquí estoy.",
        lead.first_name(),
        company.agent_name,
        company.name,
    );
    if let Some(dev) = development {
        if let Some(url) = &dev.brochure_url {
            msg.push_str(&format!("\n\n📄 Mientras tanto, conoce {}:\n{url}", dev.name));
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use sales_agent_config::DomainConfig;
    use sales_agent_core::AppointmentKind;

    fn lead_named(name: &str) -> Lead {
        let mut lead = Lead::new("4929110022", "whatsapp");
        lead.name = Some(name.to_string());
        lead
    }

    fn visit(lead: &Lead) -> Appointment {
        Appointment::new(
            lead.id,
            lead.name.clone().unwrap_or_default(),
            lead.phone.clone(),
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        )
    }

    #[test]
    fn seller_alert_carries_lead_and_gps() {
        let domain = DomainConfig::default();
        let mut lead = lead_named("Juan Pérez");
        lead.needs_credit = true;
        lead.score = 75;
        lead.category = LeadCategory::from_score(75);
        let appt = visit(&lead);

        let msg = new_appointment_for_seller(&appt, &lead, domain.development_by_key("monte_verde"));
        assert!(msg.contains("¡NUEVA CITA!"));
        assert!(msg.contains("Monte Verde"));
        assert!(msg.contains("Juan Pérez"));
        assert!(msg.contains("4929110022"));
        assert!(msg.contains("75/100 HOT 🔥"));
        assert!(msg.contains("SÍ NECESITA"));
        assert!(msg.contains("maps.google.com"));
    }

    #[test]
    fn customer_confirmation_names_the_seller() {
        let lead = lead_named("Ana María López");
        let appt = visit(&lead);
        let seller = StaffMember::new("Carlos Torres", "4920000001", "vendedor");

        let msg = appointment_confirmation_for_lead(&lead, &appt, None, Some(&seller));
        assert!(msg.contains("¡Ana, tu cita está confirmada!"));
        assert!(msg.contains("lunes 10 de marzo"));
        assert!(msg.contains("11:00 AM"));
        assert!(msg.contains("Carlos Torres"));
    }

    #[test]
    fn handoff_alert_renders_financials() {
        let mut lead = lead_named("Luis");
        lead.monthly_income = Some(30_000);
        lead.down_payment = Some(200_000);
        lead.preferred_bank = Some("BBVA".to_string());

        let msg = credit_handoff_for_advisor(&lead);
        assert!(msg.contains("¡NUEVO LEAD HIPOTECARIO!"));
        assert!(msg.contains("$30,000/mes"));
        assert!(msg.contains("$200,000"));
        // Capacity is the upper end of the range: 30k × 80.
        assert!(msg.contains("$2,400,000"));
        assert!(msg.contains("BBVA"));
        assert!(msg.contains("Por definir"));
    }

    #[test]
    fn unnamed_lead_falls_back_to_phone_tail() {
        let lead = Lead::new("whatsapp:+5214929110022", "whatsapp");
        let msg = credit_handoff_for_advisor(&lead);
        assert!(msg.contains("Cliente 0022"));
    }

    #[test]
    fn pushback_names_the_valid_window() {
        let hours = BusinessHours::default();
        let msg = outside_hours_pushback("Juan", 20, Weekday::Wed, &hours);
        assert!(msg.contains("*20:00* está fuera"));
        assert!(msg.contains("9:00 AM a 6:00 PM"));

        let saturday = outside_hours_pushback("Juan", 16, Weekday::Sat, &hours);
        assert!(saturday.contains("los sábados"));
        assert!(saturday.contains("2:00 PM"));
    }

    #[test]
    fn stage_change_reads_naturally() {
        let mut lead = lead_named("Pedro Ramírez");
        lead.score = 55;
        lead.category = LeadCategory::from_score(55);
        let msg = stage_change_for_staff(&lead, FunnelStage::Contacted, FunnelStage::Scheduled);
        assert!(msg.contains("CITA AGENDADA"));
        assert!(msg.contains("antes CONTACTADO"));
        assert!(msg.contains("WARM"));
    }
}
