use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_catalog_tables::Migration),
            Box::new(m20260101_000002_create_registration_tables::Migration),
            Box::new(m20260101_000003_create_order_tables::Migration),
            Box::new(m20260101_000004_create_payment_sessions_table::Migration),
            Box::new(m20260101_000005_create_promo_and_visitor_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20260101_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Events::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Events::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Events::Name).string().not_null())
                        .col(ColumnDef::new(Events::Currency).string().not_null())
                        .col(ColumnDef::new(Events::TaxRateBps).integer().not_null())
                        .col(
                            ColumnDef::new(Events::RegistrationCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Events::IsLive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Events::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Events::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Tickets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Tickets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Tickets::EventId).uuid().not_null())
                        .col(ColumnDef::new(Tickets::Name).string().not_null())
                        .col(ColumnDef::new(Tickets::PriceMinor).big_integer().not_null())
                        .col(ColumnDef::new(Tickets::CurrentStock).integer().not_null())
                        .col(
                            ColumnDef::new(Tickets::ReservedOnsiteQuota)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Tickets::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Tickets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Tickets::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::EventId).uuid().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::PriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Products::CurrentStock).integer().not_null())
                        .col(
                            ColumnDef::new(Products::RequiresShipping)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Tickets::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Events::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum Events {
        Table,
        Id,
        Name,
        Currency,
        TaxRateBps,
        RegistrationCount,
        IsLive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(Iden)]
    enum Tickets {
        Table,
        Id,
        EventId,
        Name,
        PriceMinor,
        CurrentStock,
        ReservedOnsiteQuota,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(Iden)]
    enum Products {
        Table,
        Id,
        EventId,
        Name,
        PriceMinor,
        CurrentStock,
        RequiresShipping,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260101_000002_create_registration_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000002_create_registration_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Registrations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Registrations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Registrations::EventId).uuid().not_null())
                        .col(ColumnDef::new(Registrations::Email).string().not_null())
                        .col(ColumnDef::new(Registrations::Name).string().not_null())
                        .col(
                            ColumnDef::new(Registrations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_registrations_event_email")
                        .table(Registrations::Table)
                        .col(Registrations::EventId)
                        .col(Registrations::Email)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Attendees::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Attendees::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Attendees::RegistrationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Attendees::EventId).uuid().not_null())
                        .col(ColumnDef::new(Attendees::FirstName).string().not_null())
                        .col(ColumnDef::new(Attendees::LastName).string().not_null())
                        .col(ColumnDef::new(Attendees::Email).string().not_null())
                        .col(ColumnDef::new(Attendees::QrCode).string().not_null())
                        .col(ColumnDef::new(Attendees::PaymentSessionId).string())
                        .col(
                            ColumnDef::new(Attendees::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Idempotency lookup path: "do attendees for this session exist?"
            manager
                .create_index(
                    Index::create()
                        .name("idx_attendees_payment_session")
                        .table(Attendees::Table)
                        .col(Attendees::PaymentSessionId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Attendees::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Registrations::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum Registrations {
        Table,
        Id,
        EventId,
        Email,
        Name,
        CreatedAt,
    }

    #[derive(Iden)]
    enum Attendees {
        Table,
        Id,
        RegistrationId,
        EventId,
        FirstName,
        LastName,
        Email,
        QrCode,
        PaymentSessionId,
        CreatedAt,
    }
}

mod m20260101_000003_create_order_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000003_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::RegistrationId).uuid().not_null())
                        .col(ColumnDef::new(Orders::EventId).uuid().not_null())
                        .col(ColumnDef::new(Orders::SessionId).string().not_null())
                        .col(ColumnDef::new(Orders::Gateway).string().not_null())
                        .col(
                            ColumnDef::new(Orders::GatewayTransactionId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::Currency).string().not_null())
                        .col(
                            ColumnDef::new(Orders::SubtotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountMinor)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::TaxMinor).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingMinor)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::TotalMinor).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            // The idempotency gate: concurrent finalize attempts for the same
            // gateway transaction collapse to one winner here.
            manager
                .create_index(
                    Index::create()
                        .name("uq_orders_gateway_transaction")
                        .table(Orders::Table)
                        .col(Orders::Gateway)
                        .col(Orders::GatewayTransactionId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_session")
                        .table(Orders::Table)
                        .col(Orders::SessionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ItemKind).string().not_null())
                        .col(ColumnDef::new(OrderItems::ItemId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::TotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        RegistrationId,
        EventId,
        SessionId,
        Gateway,
        GatewayTransactionId,
        PaymentStatus,
        Currency,
        SubtotalMinor,
        DiscountMinor,
        TaxMinor,
        ShippingMinor,
        TotalMinor,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(Iden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ItemKind,
        ItemId,
        Name,
        UnitPriceMinor,
        Quantity,
        TotalMinor,
        CreatedAt,
    }
}

mod m20260101_000004_create_payment_sessions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000004_create_payment_sessions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentSessions::SessionId)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentSessions::EventId).uuid().not_null())
                        .col(ColumnDef::new(PaymentSessions::Attendees).text().not_null())
                        .col(
                            ColumnDef::new(PaymentSessions::Registration)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessions::SelectedTickets)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessions::SelectedProducts)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessions::OrderBlueprint)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessions::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSessions::UpdatedAt)
                                .timestamp_with_time_zone(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payment_sessions_expires")
                        .table(PaymentSessions::Table)
                        .col(PaymentSessions::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentSessions::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum PaymentSessions {
        Table,
        SessionId,
        EventId,
        Attendees,
        Registration,
        SelectedTickets,
        SelectedProducts,
        OrderBlueprint,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260101_000005_create_promo_and_visitor_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000005_create_promo_and_visitor_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PromoCodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PromoCodes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromoCodes::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PromoCodes::EventId).uuid())
                        .col(ColumnDef::new(PromoCodes::Kind).string().not_null())
                        .col(ColumnDef::new(PromoCodes::Value).big_integer().not_null())
                        .col(
                            ColumnDef::new(PromoCodes::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PromoCodes::UsageLimit).integer())
                        .col(ColumnDef::new(PromoCodes::StartsAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(PromoCodes::EndsAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(PromoCodes::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(PromoCodes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Visitors::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Visitors::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Visitors::EventId).uuid().not_null())
                        .col(ColumnDef::new(Visitors::Email).string().not_null())
                        .col(
                            ColumnDef::new(Visitors::Converted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Visitors::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Visitors::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PromoCodes::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum PromoCodes {
        Table,
        Id,
        Code,
        EventId,
        Kind,
        Value,
        UsageCount,
        UsageLimit,
        StartsAt,
        EndsAt,
        IsActive,
        CreatedAt,
    }

    #[derive(Iden)]
    enum Visitors {
        Table,
        Id,
        EventId,
        Email,
        Converted,
        CreatedAt,
    }
}
