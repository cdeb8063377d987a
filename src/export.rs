use chrono::DateTime;

use crate::model::{Booking, Ms};

const PRODID: &str = "-//roomslot//RoomBooking//EN";
const DESCRIPTION: &str = "Room booking";
const GOOGLE_TEMPLATE: &str = "https://calendar.google.com/calendar/render?action=TEMPLATE";

/// `20260110T090000Z`
fn utc_stamp(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y%m%dT%H%M%SZ").to_string())
        .unwrap_or_default()
}

/// TEXT escaping for iCalendar property values.
fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// RFC 3986 percent-encoding; only unreserved characters pass through.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Single-event iCalendar document for a booking, timestamps in UTC.
pub fn booking_ics(booking: &Booking, room_name: &str, host: &str) -> String {
    let summary = if room_name.is_empty() { "Room Booking" } else { room_name };
    let start = utc_stamp(booking.span.start);
    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{PRODID}"),
        "BEGIN:VEVENT".to_string(),
        format!("UID:booking-{}@{host}", booking.id),
        format!("DTSTAMP:{start}"),
        format!("DTSTART:{start}"),
        format!("DTEND:{}", utc_stamp(booking.span.end)),
        format!("SUMMARY:{}", escape_text(summary)),
        format!("LOCATION:{}", escape_text(room_name)),
        format!("DESCRIPTION:{DESCRIPTION}"),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];
    let mut doc = lines.join("\r\n");
    doc.push_str("\r\n");
    doc
}

/// Google Calendar "add event" link for a booking.
pub fn google_calendar_url(booking: &Booking, room_name: &str) -> String {
    let title = if room_name.is_empty() { "Room Booking" } else { room_name };
    format!(
        "{GOOGLE_TEMPLATE}&text={}&details={}&location={}&dates={}/{}",
        percent_encode(title),
        percent_encode(DESCRIPTION),
        percent_encode(room_name),
        utc_stamp(booking.span.start),
        utc_stamp(booking.span.end),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Span, HOUR_MS};
    use ulid::Ulid;

    const START: Ms = 1_768_035_600_000; // 2026-01-10T09:00:00Z

    fn booking() -> Booking {
        Booking {
            id: Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap(),
            user_id: Ulid::new(),
            room_id: Ulid::new(),
            span: Span::new(START, START + HOUR_MS),
            recurring_reservation_id: None,
            share_token: "tok".into(),
        }
    }

    #[test]
    fn ics_has_utc_times_and_uid() {
        let ics = booking_ics(&booking(), "Sala A", "rooms.example.org");
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.contains("UID:booking-01ARZ3NDEKTSV4RRFFQ69G5FAV@rooms.example.org\r\n"));
        assert!(ics.contains("DTSTART:20260110T090000Z\r\n"));
        assert!(ics.contains("DTEND:20260110T100000Z\r\n"));
        assert!(ics.contains("SUMMARY:Sala A\r\n"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
    }

    #[test]
    fn ics_escapes_text() {
        let ics = booking_ics(&booking(), "Room 1; floor 2, east", "h");
        assert!(ics.contains("SUMMARY:Room 1\\; floor 2\\, east"));
    }

    #[test]
    fn empty_room_name_falls_back() {
        let ics = booking_ics(&booking(), "", "h");
        assert!(ics.contains("SUMMARY:Room Booking"));
    }

    #[test]
    fn google_url_is_encoded() {
        let url = google_calendar_url(&booking(), "Sala A&B");
        assert!(url.starts_with("https://calendar.google.com/calendar/render?action=TEMPLATE"));
        assert!(url.contains("&text=Sala%20A%26B"));
        assert!(url.contains("&details=Room%20booking"));
        assert!(url.ends_with("&dates=20260110T090000Z/20260110T100000Z"));
    }
}
